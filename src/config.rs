use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection settings for one gateway, loadable from TOML.
///
/// Only `host` and `secret` are required; everything else tunes the
/// client's failure handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JanusConfig {
    /// Gateway authority (`host[:port]`), without scheme.
    pub host: String,
    /// Value sent as `apisecret` with every request.
    pub secret: String,
    /// Per-request HTTP timeout. Must exceed the gateway's long-poll hold
    /// time (30s by default).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on how long `watch` waits for its event. Unbounded when unset.
    #[serde(default)]
    pub watch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub status_check: StatusCheck,
    #[serde(default)]
    pub poll: PollPolicy,
}

/// How response status fields are judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCheck {
    /// Requests must answer `success` (or `ack` where the plugin works
    /// asynchronously); failed long-polls count toward reinitialization.
    #[default]
    Strict,
    /// Accept every envelope regardless of status, as older deployments of
    /// this client did.
    Legacy,
}

/// Retry and reinitialization limits of the event poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay after each failed poll.
    pub backoff_ms: u64,
    /// Consecutive failures that trigger reinitialization.
    pub failure_threshold: u32,
    /// Reinitializations allowed before the session is torn down.
    pub max_reinits: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: 2000,
            failure_threshold: 2,
            max_reinits: 3,
        }
    }
}

impl PollPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl JanusConfig {
    /// Config with default policy for the given gateway.
    pub fn new(host: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secret: secret.into(),
            request_timeout_secs: default_request_timeout_secs(),
            watch_timeout_secs: None,
            status_check: StatusCheck::default(),
            poll: PollPolicy::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn watch_timeout(&self) -> Option<Duration> {
        self.watch_timeout_secs.map(Duration::from_secs)
    }

    /// Check the host is a bare authority the transport can prefix with a scheme.
    pub fn validate(&self) -> Result<(), String> {
        validate_host(&self.host)?;
        if self.poll.failure_threshold == 0 {
            return Err("poll.failure_threshold must be at least 1".into());
        }
        Ok(())
    }

    /// Read a TOML config. A missing file is `Ok(None)`, not an error.
    ///
    /// The file holds the API secret, so a world-readable file is logged.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        if let Some(mode) = exposed_mode(path) {
            tracing::warn!(
                path = %path.display(),
                mode = %format!("{mode:o}"),
                "janus config holding the API secret is world-readable, restrict it to 600"
            );
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(Some(config))
    }

    /// Write the config as TOML, creating parent directories. On unix the
    /// file is left readable by its owner only.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(write_err)?;
        restrict_to_owner(path).map_err(write_err)?;
        tracing::info!(path = %path.display(), host = %self.host, "janus config saved");
        Ok(())
    }
}

/// Default config location: `<config dir>/janus-stream/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("janus-stream").join("config.toml"))
}

/// Validate a gateway authority such as `10.0.0.5:8088` or `janus.example.org`.
///
/// - Must not be empty.
/// - Must NOT contain a scheme; the transport adds `http://`.
/// - Must not contain a path, query or whitespace.
pub fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("host must not be empty".into());
    }
    if host.contains("://") {
        return Err("host must not contain a scheme (e.g. 'http://')".into());
    }
    if host.contains('/') || host.contains('?') || host.chars().any(char::is_whitespace) {
        return Err(format!("host must be a bare host[:port], got '{host}'"));
    }
    Ok(())
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid config {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("failed to write config {}: {source}", .path.display())]
    Write { path: PathBuf, source: std::io::Error },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Permission bits of `path` if others can read it.
#[cfg(unix)]
fn exposed_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode() & 0o7777;
    (mode & 0o004 != 0).then_some(mode)
}

#[cfg(not(unix))]
fn exposed_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
