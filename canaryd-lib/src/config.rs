//! Configuration management with hierarchical overrides using figment.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (`CANARYD_*`, nested keys split on `__`)
//! 2. Explicit config file passed on the command line
//! 3. User configuration file (~/.config/canaryd/canaryd.yaml)
//! 4. Embedded defaults (lowest precedence)
//!
//! The core treats the loaded configuration as a fixed snapshot for the
//! monitoring session; there is no hot reload.

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidFormat(#[from] figment::Error),

    #[error("configuration validation failed: {message}")]
    Validation { message: String },
}

/// Main configuration for canaryd components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    /// Decoy token generation
    pub tokens: TokensConfig,
    /// Filesystem monitoring
    pub monitor: MonitorConfig,
    /// Alert delivery and persistence
    pub alerting: AlertingConfig,
    /// Operational logging
    pub logging: LoggingConfig,
}

/// Decoy token generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokensConfig {
    /// Directory decoy files are planted under; also the monitored root.
    pub root: PathBuf,
    /// Generate a fake AWS credentials file
    pub generate_aws: bool,
    /// Generate a fake SSH private key
    pub generate_ssh: bool,
    /// Generate a fake database config
    pub generate_database: bool,
    /// Generate a fake API `.env` file
    pub generate_api: bool,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("tokens"),
            generate_aws: true,
            generate_ssh: true,
            generate_database: true,
            generate_api: true,
        }
    }
}

/// Filesystem monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Coalescing window in milliseconds: repeated raw events for the same
    /// (path, kind) inside this window collapse to one detection.
    pub coalesce_window_ms: u64,
    /// Interval in seconds between liveness probes of the monitored root.
    pub heartbeat_seconds: u64,
    /// Maximum restart attempts after a lost watch subscription.
    pub max_restart_attempts: u32,
    /// Initial restart backoff in milliseconds; doubles per attempt.
    pub restart_backoff_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 500,
            heartbeat_seconds: 5,
            max_restart_attempts: 5,
            restart_backoff_ms: 500,
        }
    }
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertingConfig {
    /// Directory holding the append-only alerts log.
    pub log_dir: PathBuf,
    /// Capacity of the in-memory backup queue used while the log storage is
    /// unwritable. Overflow drops the oldest queued alert.
    pub backup_queue_capacity: usize,
    /// Fire a best-effort desktop notification per alert.
    pub desktop_notifications: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            backup_queue_capacity: 256,
            desktop_notifications: false,
        }
    }
}

/// Operational logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

/// Configuration loader with hierarchical override support.
pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader using only default locations and the environment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            explicit_file: None,
        }
    }

    /// Create a loader that also merges an explicit config file.
    #[must_use]
    pub const fn with_file(path: PathBuf) -> Self {
        Self {
            explicit_file: Some(path),
        }
    }

    /// Load configuration with hierarchical overrides.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        let user_config = Self::user_config_path();
        if user_config.exists() {
            figment = figment.merge(Yaml::file(&user_config));
        }

        if let Some(ref path) = self.explicit_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound { path: path.clone() });
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("CANARYD_").split("__"));

        let config: Config = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// User configuration file path with platform-aware directory lookup.
    fn user_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            return config_dir.join("canaryd").join("canaryd.yaml");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("canaryd")
                .join("canaryd.yaml");
        }
        PathBuf::from("/tmp").join("canaryd").join("canaryd.yaml")
    }

    fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.monitor.coalesce_window_ms == 0 {
            return Err(ConfigError::Validation {
                message: "monitor.coalesce_window_ms must be greater than 0".to_owned(),
            });
        }
        if config.monitor.heartbeat_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "monitor.heartbeat_seconds must be greater than 0".to_owned(),
            });
        }
        if config.alerting.backup_queue_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "alerting.backup_queue_capacity must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.monitor.coalesce_window_ms, 500);
        assert_eq!(config.monitor.max_restart_attempts, 5);
        assert_eq!(config.alerting.backup_queue_capacity, 256);
        assert!(config.tokens.generate_aws);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canaryd.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "monitor:\n  coalesce_window_ms: 250\ntokens:\n  generate_ssh: false"
        )
        .unwrap();

        let config = ConfigLoader::with_file(path).load().unwrap();
        assert_eq!(config.monitor.coalesce_window_ms, 250);
        assert!(!config.tokens.generate_ssh);
        // Untouched keys keep their defaults.
        assert_eq!(config.monitor.heartbeat_seconds, 5);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = ConfigLoader::with_file(PathBuf::from("/nonexistent/canaryd.yaml")).load();
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn zero_window_fails_validation() {
        let mut config = Config::default();
        config.monitor.coalesce_window_ms = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
