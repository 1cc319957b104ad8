//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: the
//! telemetry server address, reconnect policy, channel sizes and logging.
//! Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{PulseError, PulseResult};
use crate::platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Telemetry server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// State store sizing.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telemetry server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server URL (e.g., "https://telemetry.example.com").
    #[serde(default)]
    pub address: String,

    /// Optional bearer token passed during the Socket.IO handshake.
    #[serde(default)]
    pub auth_token: String,

    /// Upper bound on a single connection handshake, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Reconnect backoff configuration as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Cap on the exponential delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
}

/// State store channel sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Capacity of the inbound socket event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of the store's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
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

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.3
}

fn default_event_buffer() -> usize {
    constants::DEFAULT_EVENT_BUFFER
}

fn default_command_buffer() -> usize {
    constants::DEFAULT_COMMAND_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            auth_token: String::new(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_factor: default_jitter(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            command_buffer: default_command_buffer(),
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

impl AppConfig {
    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> PulseResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&contents)?;
        config.server.address = Self::sanitize_server_address(&config.server.address);
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> PulseResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PulseError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PulseResult<PathBuf> {
        Ok(platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> PulseResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the server connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.address.is_empty()
    }

    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> PulseResult<()> {
        if self.store.event_buffer == 0 {
            return Err(PulseError::Config("store.event_buffer must be > 0".into()));
        }
        if self.store.command_buffer == 0 {
            return Err(PulseError::Config("store.command_buffer must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(PulseError::Config(
                "reconnect.jitter_factor must be within 0.0..=1.0".into(),
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(PulseError::Config(
                "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips surrounding quotes and
    /// trailing slashes. Bare hosts default to `http://`.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://")
            || trimmed.starts_with("https://")
            || trimmed.starts_with("ws://")
            || trimmed.starts_with("wss://")
        {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
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

    /// Clone the current configuration out of the handle.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.connect_timeout_ms, 10_000);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.store.event_buffer, 256);
        assert_eq!(config.logging.level, "info");
        assert!(!config.is_server_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitize_server_address() {
        assert_eq!(
            AppConfig::sanitize_server_address("telemetry.local:8080"),
            "http://telemetry.local:8080"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("https://example.com/"),
            "https://example.com"
        );
        assert_eq!(
            AppConfig::sanitize_server_address("  \"wss://example.com/\"  "),
            "wss://example.com"
        );
        assert_eq!(AppConfig::sanitize_server_address("   "), "");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.store.event_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            address = "http://10.0.0.5:3000"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.address, "http://10.0.0.5:3000");
        assert_eq!(config.server.connect_timeout_ms, 10_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[tokio::test]
    async fn test_config_handle_write_then_read() {
        let handle = ConfigHandle::new(AppConfig::default());
        handle.write().await.server.address = "http://host:1".into();
        assert_eq!(handle.read().await.server.address, "http://host:1");
        assert!(handle.snapshot().await.is_server_configured());
    }
}
