//! Configuration management for bandwidth.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::throttle::{Quota, DEFAULT_LIMIT};

/// Prefix for environment overrides, e.g. `BANDWIDTH__THROTTLE__LIMIT`.
const ENV_PREFIX: &str = "BANDWIDTH";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Throttling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum bytes per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window duration in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Copy buffer size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_window_ms() -> u64 {
    1000
}

fn default_chunk_size() -> usize {
    32 * 1024
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BandwidthConfig {
    /// Load configuration from a YAML file, with environment overrides.
    ///
    /// Variables named `BANDWIDTH__<SECTION>__<KEY>` take precedence over the
    /// file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ThrottleError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// The configured quota.
    pub fn quota(&self) -> Result<Quota> {
        Quota::new(
            self.throttle.limit,
            Duration::from_millis(self.throttle.window_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BandwidthConfig::default();
        assert_eq!(config.throttle.limit, 1024 * 1024);
        assert_eq!(config.throttle.window_ms, 1000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.quota().unwrap(), Quota::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
throttle:
  limit: 100
  window_ms: 250
  chunk_size: 16
logging:
  level: debug
  format: json
"#;
        let config = BandwidthConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.throttle.limit, 100);
        assert_eq!(config.throttle.chunk_size, 16);
        assert_eq!(config.logging.format, LogFormat::Json);

        let quota = config.quota().unwrap();
        assert_eq!(quota.limit(), 100);
        assert_eq!(quota.window(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_partial_config_uses_defaults() {
        let yaml = r#"
throttle:
  limit: 10
"#;
        let config = BandwidthConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.throttle.limit, 10);
        assert_eq!(config.throttle.window_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_quota_is_rejected() {
        let yaml = r#"
throttle:
  window_ms: 0
"#;
        let config = BandwidthConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.quota(), Err(ThrottleError::InvalidQuota(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = BandwidthConfig::from_yaml("throttle: [1, 2");
        assert!(matches!(result, Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "bandwidth-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "throttle:\n  limit: 2048\n").unwrap();

        let config = BandwidthConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.unwrap().throttle.limit, 2048);
    }

    #[test]
    fn test_from_missing_file() {
        let result = BandwidthConfig::from_file("/nonexistent/bandwidth.yaml");
        assert!(matches!(result, Err(ThrottleError::Config(_))));
    }
}
