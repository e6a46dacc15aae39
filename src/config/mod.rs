use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ReconnectPolicy, DEFAULT_REQUEST_TIMEOUT};
use crate::controller::{SchedulerOptions, DEFAULT_RETRY_INTERVAL};
use crate::storage::memory::{DEFAULT_HISTORY_LIMIT, DEFAULT_INITIAL_REVISION};

/// Default API server port
pub const DEFAULT_API_PORT: u16 = 8181;

/// Default config file location: ~/.minik8s/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".minik8s")
        .join("config")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The complete configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Reconnect policy for reflector watches
    #[serde(default)]
    pub watch: ReconnectPolicy,

    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_addr: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Revision of the empty store; the first write gets this plus one
    #[serde(default = "default_initial_revision")]
    pub initial_revision: i64,

    /// Events kept for watches resuming from an older revision
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_address(),
            port: DEFAULT_API_PORT,
            initial_revision: DEFAULT_INITIAL_REVISION,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_interval_ms: default_retry_interval_ms(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_initial_revision() -> i64 {
    DEFAULT_INITIAL_REVISION
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_server_url() -> String {
    format!("http://localhost:{}", DEFAULT_API_PORT)
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_workers() -> usize {
    1
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL.as_millis() as u64
}

fn default_conflict_retries() -> u32 {
    5
}

// ============================================================================
// Pure functions (no I/O)
// ============================================================================

/// Parse and validate config from a YAML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::WriteError(e.to_string()))
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.initial_revision < 0 {
            return Err(ConfigError::Invalid(format!(
                "server.initialRevision must not be negative (got {})",
                self.server.initial_revision
            )));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "client.requestTimeoutSecs must be at least 1".to_string(),
            ));
        }
        if self.watch.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "watch.multiplier must be at least 1.0 (got {})",
                self.watch.multiplier
            )));
        }
        Ok(())
    }

    /// Address the API server listens on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.port)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            workers: self.controller.workers.max(1),
            retry_interval: Duration::from_millis(self.controller.retry_interval_ms),
            conflict_retries: self.controller.conflict_retries,
            reconnect: self.watch.clone(),
        }
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from `path`, or the default location when `None`.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config_from(path),
        None => load_config_from(&default_config_path()),
    }
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8181);
        assert_eq!(config.server.initial_revision, 100);
        assert_eq!(config.server.history_limit, 1000);
        assert_eq!(config.controller.retry_interval_ms, 3000);
        assert_eq!(config.watch, ReconnectPolicy::fixed(Duration::from_secs(5)));
        assert_eq!(config.listen_addr(), "0.0.0.0:8181");
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
server:
  port: 9000
client:
  serverUrl: http://10.0.0.1:9000
watch:
  maxAttempts: 3
  initialBackoffMs: 100
  maxBackoffMs: 1000
  multiplier: 2.0
controller:
  workers: 4
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.client.server_url, "http://10.0.0.1:9000");
        assert_eq!(config.client.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.watch.max_attempts, Some(3));
        assert_eq!(config.watch.initial_backoff, Duration::from_millis(100));

        let options = config.scheduler_options();
        assert_eq!(options.workers, 4);
        assert_eq!(options.retry_interval, Duration::from_secs(3));
        assert_eq!(options.reconnect.max_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_empty_document() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("client:\n  requestTimeoutSecs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("watch:\n  multiplier: 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = parse_config("server: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_serialize_uses_camel_case() {
        let yaml = serialize_config(&Config::default()).unwrap();
        assert!(yaml.contains("bindAddr: 0.0.0.0"));
        assert!(yaml.contains("historyLimit: 1000"));
        assert!(yaml.contains("retryIntervalMs: 3000"));
        assert!(yaml.contains("initialBackoffMs: 5000"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");

        let mut config = Config::default();
        config.server.port = 7000;
        config.controller.conflict_retries = 9;
        save_config_to(&config, &path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent"))).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
