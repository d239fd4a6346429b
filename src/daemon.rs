//! Daemon lifecycle: wires configuration, supervisor and timer together.

use anyhow::Context;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::ConfigFile;
use crate::notify::WebhookNotifier;
use crate::probe::TcpProber;
use crate::record::RecordLog;
use crate::supervisor::process::ProcessController;
use crate::supervisor::report::Reporter;
use crate::supervisor::{Supervisor, TickOutcome};
use crate::timer::PeriodicTimer;

/// How often the timer wakes up. The supervisor decides on its own whether a
/// wake-up is due for a check.
pub const TIMER_PERIOD: Duration = Duration::from_secs(1);

pub struct Daemon {
    record: RecordLog,
    timer: Option<PeriodicTimer>,
}

impl Daemon {
    /// Loads settings from `<root>/cfg/config.toml` and starts supervising.
    /// Must be called from within a tokio runtime.
    pub fn init(root: &Path) -> anyhow::Result<Self> {
        let config = ConfigFile::in_root(root);
        let check_interval = config.load_check_interval();
        let notification = config
            .load_notification_settings()
            .with_context(|| format!("load notification settings from {}", config.path().display()))?;

        let record = RecordLog::in_root(root);
        let reporter = Reporter::new()
            .with_record(record.clone())
            .with_notifier(WebhookNotifier::default(), notification);

        let mut supervisor = Supervisor::new(
            config,
            ProcessController::new(),
            TcpProber::default(),
            check_interval,
        )
        .with_reporter(reporter);

        tracing::info!("check interval {}s", check_interval.as_secs());

        // before the first tick, which fires immediately
        record.append("daemon init");
        let timer = PeriodicTimer::start(TIMER_PERIOD, move || {
            match supervisor.on_timer(Instant::now()) {
                TickOutcome::Skipped => {}
                TickOutcome::Aborted => tracing::warn!("check aborted, service list unavailable"),
                TickOutcome::Completed(transitions) => {
                    tracing::debug!(
                        "check done, {} transitions, {} tracked",
                        transitions.len(),
                        supervisor.tracker().len()
                    );
                }
            }
        });

        Ok(Self {
            record,
            timer: Some(timer),
        })
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().map_or(false, PeriodicTimer::is_running)
    }

    /// Stops the timer, waiting for an in-flight check. Idempotent.
    pub async fn exit(&mut self) {
        let Some(mut timer) = self.timer.take() else {
            return;
        };
        timer.stop().await;
        self.record.append("daemon exit");
        tracing::info!("daemon exit");
    }
}

/// Resolves on Ctrl-C, or SIGTERM/SIGQUIT on unix. A handler that cannot
/// be installed is skipped; if none can, this never resolves and only the
/// `exit` command stops the daemon.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigquit) = match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
        (Ok(sigterm), Ok(sigquit)) => (sigterm, sigquit),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("install SIGTERM/SIGQUIT handlers failed: {}, waiting for ctrl-c only", e);
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("listen for ctrl-c failed: {}", e);
        std::future::pending::<()>().await;
    }
}
