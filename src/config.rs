//! Operator configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) yields a working configuration.

use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Data-store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Port every node listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path of the `redis-cli` binary used as the command transport
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
}

fn default_port() -> u16 {
    6379
}

fn default_cli_path() -> String {
    "redis-cli".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cli_path: default_cli_path(),
        }
    }
}

/// Poll intervals and timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_generic_check_interval_ms")]
    pub generic_check_interval_ms: u64,
    #[serde(default = "default_generic_check_timeout_ms")]
    pub generic_check_timeout_ms: u64,
    #[serde(default = "default_cluster_create_interval_ms")]
    pub cluster_create_interval_ms: u64,
    #[serde(default = "default_cluster_create_timeout_ms")]
    pub cluster_create_timeout_ms: u64,
    /// Interval of the short poll that detects the start of a data load
    #[serde(default = "default_load_check_interval_ms")]
    pub load_check_interval_ms: u64,
    #[serde(default = "default_pod_check_interval_ms")]
    pub pod_check_interval_ms: u64,
    #[serde(default = "default_pod_ready_timeout_ms")]
    pub pod_ready_timeout_ms: u64,
    #[serde(default = "default_pod_delete_timeout_ms")]
    pub pod_delete_timeout_ms: u64,
}

fn default_generic_check_interval_ms() -> u64 {
    2_000
}

fn default_generic_check_timeout_ms() -> u64 {
    60_000
}

fn default_cluster_create_interval_ms() -> u64 {
    5_000
}

fn default_cluster_create_timeout_ms() -> u64 {
    90_000
}

fn default_load_check_interval_ms() -> u64 {
    500
}

fn default_pod_check_interval_ms() -> u64 {
    1_000
}

fn default_pod_ready_timeout_ms() -> u64 {
    120_000
}

fn default_pod_delete_timeout_ms() -> u64 {
    120_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            generic_check_interval_ms: default_generic_check_interval_ms(),
            generic_check_timeout_ms: default_generic_check_timeout_ms(),
            cluster_create_interval_ms: default_cluster_create_interval_ms(),
            cluster_create_timeout_ms: default_cluster_create_timeout_ms(),
            load_check_interval_ms: default_load_check_interval_ms(),
            pod_check_interval_ms: default_pod_check_interval_ms(),
            pod_ready_timeout_ms: default_pod_ready_timeout_ms(),
            pod_delete_timeout_ms: default_pod_delete_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn generic_check_interval(&self) -> Duration {
        Duration::from_millis(self.generic_check_interval_ms)
    }

    pub fn generic_check_timeout(&self) -> Duration {
        Duration::from_millis(self.generic_check_timeout_ms)
    }

    pub fn cluster_create_interval(&self) -> Duration {
        Duration::from_millis(self.cluster_create_interval_ms)
    }

    pub fn cluster_create_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster_create_timeout_ms)
    }

    pub fn load_check_interval(&self) -> Duration {
        Duration::from_millis(self.load_check_interval_ms)
    }

    pub fn pod_check_interval(&self) -> Duration {
        Duration::from_millis(self.pod_check_interval_ms)
    }

    pub fn pod_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.pod_ready_timeout_ms)
    }

    pub fn pod_delete_timeout(&self) -> Duration {
        Duration::from_millis(self.pod_delete_timeout_ms)
    }
}

/// Reconcile loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Upper bound on concurrent per-node tasks during fan-out
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Requeue hint returned after a successful reconcile
    #[serde(default = "default_requeue_after_secs")]
    pub requeue_after_secs: u64,
}

fn default_max_concurrency() -> usize {
    16
}

fn default_requeue_after_secs() -> u64 {
    30
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            requeue_after_secs: default_requeue_after_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }
}

/// Logging section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format: text or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl OperatorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: OperatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis.port == 0 {
            return Err(OperatorError::Config("redis.port must not be 0".to_string()));
        }
        if self.reconcile.max_concurrency == 0 {
            return Err(OperatorError::Config(
                "reconcile.max_concurrency must be at least 1".to_string(),
            ));
        }
        let t = &self.timing;
        let intervals = [
            ("generic_check_interval_ms", t.generic_check_interval_ms),
            ("cluster_create_interval_ms", t.cluster_create_interval_ms),
            ("load_check_interval_ms", t.load_check_interval_ms),
            ("pod_check_interval_ms", t.pod_check_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(OperatorError::Config(format!(
                    "timing.{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }
}
