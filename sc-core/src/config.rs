//! Application configuration management.
//!
//! Handles loading, saving, and accessing application configuration including
//! the server address, credentials, and socket tuning knobs. Configuration
//! is persisted as TOML on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{ScError, ScResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Real-time socket behaviour.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server URL (e.g., "https://chat.example.com").
    #[serde(default)]
    pub address: String,

    /// Application API key sent with every connect request.
    #[serde(default)]
    pub api_key: String,

    /// User token used for the `Authorization` header.
    #[serde(default)]
    pub user_token: String,

    /// Custom HTTP headers added to the WebSocket handshake.
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Socket heartbeat, batching and reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Seconds between heartbeat pings while connected.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds a ping may stay unanswered before it counts as missed.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Consecutive missed pongs before the connection is dropped.
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,

    /// Event batching window in milliseconds.
    #[serde(default = "default_batch_period")]
    pub batch_period_ms: u64,

    /// First reconnection delay in milliseconds.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnection delay cap in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each reconnection delay.
    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,

    /// Maximum consecutive reconnection attempts (0 = unlimited).
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// Grace period for the socket to close after a server error, in milliseconds.
    #[serde(default = "default_server_close_grace")]
    pub server_close_grace_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_ping_interval() -> u64 {
    constants::PING_INTERVAL_SECS
}

fn default_pong_timeout() -> u64 {
    constants::PONG_TIMEOUT_SECS
}

fn default_max_missed_pongs() -> u32 {
    constants::MAX_MISSED_PONGS
}

fn default_batch_period() -> u64 {
    constants::EVENT_BATCH_PERIOD_MS
}

fn default_reconnect_base_delay() -> u64 {
    constants::RECONNECT_BASE_DELAY_MS
}

fn default_reconnect_max_delay() -> u64 {
    constants::RECONNECT_MAX_DELAY_MS
}

fn default_reconnect_jitter() -> f64 {
    constants::RECONNECT_JITTER
}

fn default_server_close_grace() -> u64 {
    constants::SERVER_CLOSE_GRACE_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            api_key: String::new(),
            user_token: String::new(),
            custom_headers: BTreeMap::new(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            max_missed_pongs: default_max_missed_pongs(),
            batch_period_ms: default_batch_period(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            reconnect_jitter: default_reconnect_jitter(),
            reconnect_max_attempts: 0,
            server_close_grace_ms: default_server_close_grace(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

/// `base/StreamClient`, e.g. `~/.config/StreamClient` on Linux.
fn app_dir(base: Option<PathBuf>, kind: &str) -> ScResult<PathBuf> {
    base.map(|dir| dir.join(constants::APP_NAME))
        .ok_or_else(|| ScError::Config(format!("could not determine {kind} directory")))
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> ScResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ScResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> ScResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ScResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ScError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> ScResult<PathBuf> {
        let config_dir = app_dir(dirs::config_dir(), "config")?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> ScResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let data_dir = app_dir(dirs::data_dir(), "data")?;
            Ok(data_dir.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the server connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty() && !self.server.api_key.is_empty()
    }

    /// Reject values the socket layer cannot work with.
    pub fn validate(&self) -> ScResult<()> {
        let socket = &self.socket;
        if socket.ping_interval_secs == 0 {
            return Err(ScError::Config("socket.ping_interval_secs must be positive".into()));
        }
        if socket.max_missed_pongs == 0 {
            return Err(ScError::Config("socket.max_missed_pongs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&socket.reconnect_jitter) {
            return Err(ScError::Config(format!(
                "socket.reconnect_jitter must be within 0.0..=1.0, got {}",
                socket.reconnect_jitter
            )));
        }
        if socket.reconnect_base_delay_ms > socket.reconnect_max_delay_ms {
            return Err(ScError::Config(
                "socket.reconnect_base_delay_ms exceeds socket.reconnect_max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes. Bare
    /// hosts default to https unless they point at a local machine.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let has_scheme = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| trimmed.starts_with(scheme));

        let with_scheme = if has_scheme {
            trimmed.to_string()
        } else if trimmed.starts_with("localhost")
            || trimmed.starts_with("127.")
            || trimmed.starts_with("192.168.")
        {
            format!("http://{trimmed}")
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across tasks.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to a file.
    pub async fn save_to(&self, path: &Path) -> ScResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_dir_appends_app_name() {
        let dir = app_dir(Some(PathBuf::from("/tmp/base")), "config").unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/base").join(constants::APP_NAME));
        assert!(matches!(app_dir(None, "data"), Err(ScError::Config(_))));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.connect_timeout_ms, 10_000);
        assert_eq!(config.socket.ping_interval_secs, 25);
        assert_eq!(config.socket.max_missed_pongs, 2);
        assert_eq!(config.logging.level, "info");
        assert!(!config.is_server_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitize_server_address() {
        assert_eq!(
            AppConfig::sanitize_server_address("chat.example.com/"),
            "https://chat.example.com"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("http://192.168.1.100:3030/"),
            "http://192.168.1.100:3030"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("  \"wss://example.com/\"  "),
            "wss://example.com"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("localhost:3030"),
            "http://localhost:3030"
        );
        assert_eq!(AppConfig::sanitize_server_address("   "), "");
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = AppConfig::default();
        config.socket.reconnect_jitter = 1.5;
        assert!(matches!(config.validate(), Err(ScError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = AppConfig::default();
        config.socket.reconnect_base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            address = "https://chat.example.com"
            api_key = "key"

            [socket]
            ping_interval_secs = 10
            "#,
        )
        .unwrap();
        assert!(config.is_server_configured());
        assert_eq!(config.socket.ping_interval_secs, 10);
        assert_eq!(config.socket.pong_timeout_secs, 3);
        assert_eq!(config.socket.batch_period_ms, 500);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.server.address = "https://chat.example.com".into();
        config.server.custom_headers.insert("X-Env".into(), "staging".into());
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.address, "https://chat.example.com");
        assert_eq!(loaded.server.custom_headers["X-Env"], "staging");
    }
}
