//! Service transition notifications.
//!
//! The supervisor renders a small HTML fragment per transition; delivery is
//! a blocking webhook POST so it can run inside the tick.

use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use ureq::AgentBuilder;

use crate::config::NotificationSettings;

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no receiver configured")]
    NoRecipients,

    #[error("notification transport failed: {0}")]
    Transport(String),
}

pub fn render_restart(command_line: &str) -> String {
    format!("<DIV> {{{}}} is restart </DIV>", command_line)
}

pub fn render_stop(command_line: &str) -> String {
    format!("<DIV> {{{}}} is stop </DIV>", command_line)
}

pub trait Notifier: Send {
    fn send(&self, settings: &NotificationSettings, fragment: &str) -> Result<(), NotifyError>;
}

/// Posts notifications as JSON to `settings.endpoint`.
pub struct WebhookNotifier {
    agent: ureq::Agent,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_TIMEOUT)
    }
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, settings: &NotificationSettings, fragment: &str) -> Result<(), NotifyError> {
        if settings.recipient_count() == 0 {
            return Err(NotifyError::NoRecipients);
        }

        let body = json!({
            "subject": settings.subject,
            "from": settings.from,
            "nickname": settings.nickname,
            "to": settings.to,
            "cc": settings.cc,
            "bcc": settings.bcc,
            "content_type": "text/html",
            "content": fragment,
        });

        self.agent
            .post(&settings.endpoint)
            .send_json(body)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        tracing::debug!("notification sent to {}", settings.endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn settings(endpoint: &str) -> NotificationSettings {
        NotificationSettings {
            enabled: true,
            endpoint: endpoint.to_string(),
            subject: "warden".to_string(),
            to: vec!["<ops@example.com>".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_fragments() {
        assert_eq!(render_restart("/opt/a/run.sh"), "<DIV> {/opt/a/run.sh} is restart </DIV>");
        assert_eq!(render_stop("/opt/a/run.sh -v"), "<DIV> {/opt/a/run.sh -v} is stop </DIV>");
    }

    #[test]
    fn test_send_without_recipients() {
        let mut settings = settings("http://127.0.0.1:9/");
        settings.to.clear();
        let notifier = WebhookNotifier::new(Duration::from_secs(1));
        assert!(matches!(
            notifier.send(&settings, "<DIV> x </DIV>"),
            Err(NotifyError::NoRecipients)
        ));
    }

    #[test]
    fn test_send_posts_fragment() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/notify", listener.local_addr().unwrap());

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            // read until the JSON body has arrived
            while !String::from_utf8_lossy(&received).contains("is stop") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            String::from_utf8_lossy(&received).to_string()
        });

        let notifier = WebhookNotifier::new(Duration::from_secs(5));
        let result = notifier.send(&settings(&endpoint), &render_stop("/opt/a/run.sh"));
        assert!(result.is_ok(), "send failed: {:?}", result);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /notify"));
        assert!(request.contains("<ops@example.com>"));
    }

    #[test]
    fn test_send_to_closed_endpoint_fails() {
        let endpoint = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}/notify", listener.local_addr().unwrap())
        };
        let notifier = WebhookNotifier::new(Duration::from_secs(1));
        assert!(matches!(
            notifier.send(&settings(&endpoint), "<DIV> x </DIV>"),
            Err(NotifyError::Transport(_))
        ));
    }
}
