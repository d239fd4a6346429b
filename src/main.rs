use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use svc_warden::config::ConfigFile;
use svc_warden::daemon::{self, Daemon};
use svc_warden::exclusive::{ExclusiveGuard, LOCK_NAME};
use svc_warden::supervisor::error::StartupError;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

const ROOT_ENV: &str = "SVC_WARDEN_ROOT";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[{}] {}", e.error_code(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let mut guard = ExclusiveGuard::acquire(LOCK_NAME)?;

    let root = resolve_root()?;
    std::env::set_current_dir(&root)
        .map_err(|e| StartupError::RootDirectory(format!("{}: {}", root.display(), e)))?;

    init_logging(&ConfigFile::in_root(&root).load_log_level())?;
    tracing::info!("svc-warden starting, root {}", root.display());

    let mut daemon = Daemon::init(&root).map_err(StartupError::DaemonInit)?;
    println!("daemon start success, input \"exit\" to stop it");

    tokio::select! {
        _ = wait_for_exit_command() => tracing::info!("exit command received"),
        _ = daemon::wait_for_shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    daemon.exit().await;
    guard.release();
    Ok(())
}

/// `SVC_WARDEN_ROOT` when set, otherwise the directory holding the binary.
fn resolve_root() -> Result<PathBuf, StartupError> {
    if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    let exe = std::env::current_exe().map_err(|e| StartupError::RootDirectory(e.to_string()))?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or_else(|| StartupError::RootDirectory(format!("{} has no parent", exe.display())))
}

/// `RUST_LOG` overrides the configured level.
fn init_logging(level: &str) -> Result<(), StartupError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| StartupError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| StartupError::Logging(e.to_string()))
}

/// Resolves once a line reading `exit` arrives on stdin. Never resolves if
/// stdin closes first.
async fn wait_for_exit_command() {
    let (tx, rx) = oneshot::channel();

    // blocking stdin reads stay off the runtime so shutdown never waits on them
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim() == "exit" => {
                    let _ = tx.send(());
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });

    if rx.await.is_err() {
        std::future::pending::<()>().await;
    }
}
