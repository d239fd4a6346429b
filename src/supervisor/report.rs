use crate::config::NotificationSettings;
use crate::notify::{self, Notifier};
use crate::record::RecordLog;

/// A state change observed during a reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A service that was healthy failed its liveness check.
    WentDown { command_line: String },
    /// A service that went down passed its liveness check again.
    Recovered { command_line: String },
    /// A tracked instance was terminated ahead of a respawn.
    Stopped { command_line: String, process_id: u32 },
    Started { command_line: String, process_id: u32 },
    StartFailed { command_line: String },
}

impl Transition {
    pub fn command_line(&self) -> &str {
        match self {
            Self::WentDown { command_line }
            | Self::Recovered { command_line }
            | Self::Stopped { command_line, .. }
            | Self::Started { command_line, .. }
            | Self::StartFailed { command_line } => command_line,
        }
    }

    /// Line for the record trail. Outage and recovery are only notified.
    pub fn record_line(&self) -> Option<String> {
        match self {
            Self::Stopped { command_line, .. } => Some(format!("process {{{}}} is stop", command_line)),
            Self::Started { command_line, .. } => Some(format!("process {{{}}} is start", command_line)),
            Self::StartFailed { command_line } => Some(format!("start process {{{}}} failed", command_line)),
            Self::WentDown { .. } | Self::Recovered { .. } => None,
        }
    }

    /// Fragment to notify about, once per outage and once per recovery.
    pub fn notification(&self) -> Option<String> {
        match self {
            Self::WentDown { command_line } => Some(notify::render_stop(command_line)),
            Self::Recovered { command_line } => Some(notify::render_restart(command_line)),
            Self::Stopped { .. } | Self::Started { .. } | Self::StartFailed { .. } => None,
        }
    }
}

/// Fans transitions out to the record trail and the optional notifier.
#[derive(Default)]
pub struct Reporter {
    record: Option<RecordLog>,
    notifier: Option<(Box<dyn Notifier>, NotificationSettings)>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: RecordLog) -> Self {
        self.record = Some(record);
        self
    }

    /// Ignored unless `settings.enabled`.
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static, settings: NotificationSettings) -> Self {
        if settings.enabled {
            self.notifier = Some((Box::new(notifier), settings));
        }
        self
    }

    pub fn record(&self, line: &str) {
        if let Some(record) = &self.record {
            record.append(line);
        }
    }

    pub fn report(&self, transition: &Transition) {
        if let Some(line) = transition.record_line() {
            self.record(&line);
        }

        let Some((notifier, settings)) = &self.notifier else {
            return;
        };
        if let Some(fragment) = transition.notification() {
            if let Err(e) = notifier.send(settings, &fragment) {
                tracing::error!("send notification failed, content : {{{}}}: {}", fragment, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, _settings: &NotificationSettings, fragment: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(fragment.to_string());
            Ok(())
        }
    }

    fn enabled() -> NotificationSettings {
        NotificationSettings {
            enabled: true,
            to: vec!["<ops@example.com>".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_record_lines() {
        let stopped = Transition::Stopped { command_line: "/a".into(), process_id: 1 };
        let started = Transition::Started { command_line: "/a".into(), process_id: 2 };
        let failed = Transition::StartFailed { command_line: "/a".into() };

        assert_eq!(stopped.record_line().as_deref(), Some("process {/a} is stop"));
        assert_eq!(started.record_line().as_deref(), Some("process {/a} is start"));
        assert_eq!(failed.record_line().as_deref(), Some("start process {/a} failed"));
        assert_eq!(Transition::WentDown { command_line: "/a".into() }.record_line(), None);
        assert_eq!(failed.command_line(), "/a");
    }

    #[test]
    fn test_only_outage_and_recovery_notified() {
        let notifier = RecordingNotifier::default();
        let reporter = Reporter::new().with_notifier(notifier.clone(), enabled());

        reporter.report(&Transition::Stopped { command_line: "/a".into(), process_id: 2 });
        reporter.report(&Transition::Started { command_line: "/a".into(), process_id: 3 });
        reporter.report(&Transition::StartFailed { command_line: "/a".into() });
        assert!(notifier.sent.lock().unwrap().is_empty());

        reporter.report(&Transition::WentDown { command_line: "/a".into() });
        reporter.report(&Transition::Recovered { command_line: "/a".into() });
        assert_eq!(
            *notifier.sent.lock().unwrap(),
            vec!["<DIV> {/a} is stop </DIV>".to_string(), "<DIV> {/a} is restart </DIV>".to_string()]
        );
    }

    #[test]
    fn test_disabled_notifier_is_dropped() {
        let notifier = RecordingNotifier::default();
        let reporter = Reporter::new().with_notifier(notifier.clone(), NotificationSettings::default());
        reporter.report(&Transition::WentDown { command_line: "/a".into() });
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = RecordLog::in_root(dir.path());
        let reporter = Reporter::new().with_record(record.clone());

        reporter.report(&Transition::Recovered { command_line: "/a".into() });
        reporter.report(&Transition::Started { command_line: "/a".into(), process_id: 2 });
        let content = std::fs::read_to_string(record.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.trim_end().ends_with("process {/a} is start"));
    }
}
