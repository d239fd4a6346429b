//! Daemon configuration, read from `cfg/config.toml` under the daemon root.
//!
//! The file is re-read for every reconciliation tick (`load_services`),
//! while the check interval and notification settings are read once at
//! daemon init.
//!
//! ```toml
//! check_interval = 30
//! log_level = "info"
//!
//! [notification]
//! enabled = false
//! endpoint = "http://127.0.0.1:8025/notify"
//! subject = "service supervisor"
//! from = "warden@example.com"
//! to = ["ops@example.com"]
//!
//! [[services]]
//! show = false
//! host = "127.0.0.1"
//! ports = ["9090"]
//! path = "/opt/app"
//! file = "run.sh"
//! params = ["--port", "9090"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const MIN_CHECK_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
pub const MAX_CHECK_INTERVAL_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid service entry: {0}")]
    InvalidService(String),

    #[error("invalid notification settings: {0}")]
    InvalidNotification(String),
}

/// One configured child service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub show_window: bool,
    pub host: String,
    /// Empty means liveness is decided from the process table instead of TCP.
    pub ports: Vec<String>,
    /// Always ends with a path separator.
    pub working_directory: String,
    pub executable_file: String,
    pub extra_arguments: Vec<String>,
}

impl ServiceDescriptor {
    /// Validates and normalizes the two required fields. Surrounding double
    /// quotes are trimmed; a working directory without a trailing separator
    /// gets `/` appended.
    pub fn new(working_directory: &str, executable_file: &str) -> Result<Self, ConfigError> {
        let mut working_directory = working_directory.trim_matches('"').to_string();
        if working_directory.is_empty() {
            return Err(ConfigError::InvalidService("<path> is empty".to_string()));
        }
        if !working_directory.ends_with('/') && !working_directory.ends_with('\\') {
            working_directory.push('/');
        }

        let executable_file = executable_file.trim_matches('"').to_string();
        if executable_file.is_empty() {
            return Err(ConfigError::InvalidService("<file> is empty".to_string()));
        }

        Ok(Self {
            show_window: false,
            host: DEFAULT_HOST.to_string(),
            ports: Vec::new(),
            working_directory,
            executable_file,
            extra_arguments: Vec::new(),
        })
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = if host.is_empty() { DEFAULT_HOST.to_string() } else { host.to_string() };
        self
    }

    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_show_window(mut self, show_window: bool) -> Self {
        self.show_window = show_window;
        self
    }

    /// `working_directory + executable_file`, unquoted.
    pub fn program_path(&self) -> String {
        format!("{}{}", self.working_directory, self.executable_file)
    }

    /// Stable identity key of the service across ticks.
    pub fn command_line(&self) -> String {
        let mut cmdl = if cfg!(windows) {
            quote_program_path(&self.program_path())
        } else {
            self.program_path()
        };

        let params = self.extra_arguments.join(" ");
        if !params.is_empty() {
            cmdl.push(' ');
            cmdl.push_str(&params);
        }
        cmdl
    }

    /// Process-table name to look for when the service is not tracked yet:
    /// the image name on Windows, the full command line elsewhere.
    pub fn fallback_process_name(&self) -> String {
        if cfg!(windows) {
            self.executable_file.clone()
        } else {
            self.command_line()
        }
    }
}

/// Wraps a program path in double quotes when it contains a space, for
/// launch APIs that parse the executable out of a single command string.
pub fn quote_program_path(path: &str) -> String {
    if path.contains(' ') {
        format!("\"{}\"", path)
    } else {
        path.to_string()
    }
}

/// Clamps a raw interval in seconds to `[3, 300]`.
pub fn clamp_check_interval(raw_secs: i64) -> u64 {
    if raw_secs < MIN_CHECK_INTERVAL_SECS as i64 {
        MIN_CHECK_INTERVAL_SECS
    } else if raw_secs > MAX_CHECK_INTERVAL_SECS as i64 {
        MAX_CHECK_INTERVAL_SECS
    } else {
        raw_secs as u64
    }
}

fn check_interval_secs(raw: Option<&toml::Value>) -> u64 {
    let parsed = match raw {
        Some(toml::Value::Integer(secs)) => Some(*secs),
        Some(toml::Value::String(text)) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(secs) => clamp_check_interval(secs),
        None => DEFAULT_CHECK_INTERVAL_SECS,
    }
}

/// `[notification]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Webhook URL the rendered message is posted to.
    pub endpoint: String,
    pub subject: String,
    pub from: String,
    pub nickname: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl NotificationSettings {
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Wraps every address as `<addr>` and checks that an enabled
    /// notifier has somewhere to deliver to.
    fn normalize(mut self) -> Result<Self, ConfigError> {
        if !self.enabled {
            return Ok(self);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidNotification("<endpoint> is empty".to_string()));
        }
        if self.recipient_count() == 0 {
            return Err(ConfigError::InvalidNotification("no receiver".to_string()));
        }

        if !self.from.is_empty() {
            self.from = angle_address(&self.from);
        }
        for list in [&mut self.to, &mut self.cc, &mut self.bcc] {
            for address in list.iter_mut() {
                *address = angle_address(address);
            }
        }
        Ok(self)
    }
}

fn angle_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with('<') && address.ends_with('>') {
        address.to_string()
    } else {
        format!("<{}>", address)
    }
}

#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    #[serde(default)]
    check_interval: Option<toml::Value>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    notification: Option<toml::Value>,
    #[serde(default)]
    services: Vec<toml::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawPort {
    Number(i64),
    Text(String),
}

impl RawPort {
    fn into_string(self) -> String {
        match self {
            RawPort::Number(port) => port.to_string(),
            RawPort::Text(port) => port.trim().to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct RawService {
    #[serde(default)]
    show: bool,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ports: Vec<RawPort>,
    path: Option<String>,
    file: Option<String>,
    #[serde(default)]
    params: Vec<String>,
}

fn parse_service(value: toml::Value) -> Result<ServiceDescriptor, ConfigError> {
    let raw: RawService = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::InvalidService(e.to_string()))?;

    let path = raw
        .path
        .ok_or_else(|| ConfigError::InvalidService("missing <path>".to_string()))?;
    let file = raw
        .file
        .ok_or_else(|| ConfigError::InvalidService("missing <file>".to_string()))?;

    Ok(ServiceDescriptor::new(&path, &file)?
        .with_show_window(raw.show)
        .with_host(raw.host.as_deref().unwrap_or_default())
        .with_ports(raw.ports.into_iter().map(RawPort::into_string))
        .with_arguments(raw.params))
}

/// Source of the desired service list, re-read on every tick.
pub trait ServiceSource: Send {
    fn load_services(&self) -> Result<Vec<ServiceDescriptor>, ConfigError>;
}

/// The on-disk configuration file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/cfg/config.toml`
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join("cfg").join("config.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<RawConfig, ConfigError> {
        let display = self.path.display().to_string();
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Check interval, clamped. Never fails: an unreadable file falls back
    /// to the default.
    pub fn load_check_interval(&self) -> Duration {
        let secs = match self.read_raw() {
            Ok(raw) => check_interval_secs(raw.check_interval.as_ref()),
            Err(e) => {
                tracing::error!("{}, using default check interval", e);
                DEFAULT_CHECK_INTERVAL_SECS
            }
        };
        Duration::from_secs(secs)
    }

    pub fn load_log_level(&self) -> String {
        self.read_raw()
            .ok()
            .and_then(|raw| raw.log_level)
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    /// A missing `[notification]` section means notifications are disabled.
    pub fn load_notification_settings(&self) -> Result<NotificationSettings, ConfigError> {
        let raw = self.read_raw()?;
        let settings: NotificationSettings = match raw.notification {
            Some(value) => value
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::InvalidNotification(e.to_string()))?,
            None => NotificationSettings::default(),
        };
        settings.normalize()
    }
}

impl ServiceSource for ConfigFile {
    /// Malformed `[[services]]` entries are logged and dropped; only a
    /// missing or unparseable file fails the whole load.
    fn load_services(&self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        let raw = self.read_raw()?;
        let mut services = Vec::with_capacity(raw.services.len());
        for (index, value) in raw.services.into_iter().enumerate() {
            match parse_service(value) {
                Ok(service) => services.push(service),
                Err(e) => tracing::error!("services[{}] dropped: {}", index, e),
            }
        }
        Ok(services)
    }
}
