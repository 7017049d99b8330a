//! Configuration types for cronq
//!
//! Layered configuration: built-in defaults, optionally overridden by a
//! JSON config file, then by `CRONQ_*` environment variables (env wins).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CronError, Result};

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub database: DatabaseConfig,
    pub timing: TimingConfig,
    /// Host identity the scheduler reports itself as (informational, used
    /// in run-log `node_name` defaults).
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            timing: TimingConfig::default(),
            host: default_host(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load the default configuration, then a JSON file if `path` is
    /// given and exists, then environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_json::from_str(&content)
                    .map_err(|e| CronError::Config(format!("{}: {}", path.display(), e)))?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CRONQ_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CRONQ_ENABLE_SUPERUSER_JOBS") {
            if let Ok(b) = v.parse() {
                self.database.enable_superuser_jobs = b;
            }
        }
        if let Ok(v) = std::env::var("CRONQ_SUPERUSER_NAMES") {
            self.database.superuser_names =
                v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("CRONQ_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.connect_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("CRONQ_MAX_WAIT_MS") {
            if let Ok(ms) = v.parse() {
                self.timing.max_wait = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("CRONQ_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("CRONQ_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.timing.max_wait > Duration::from_secs(1) {
            return Err(CronError::Config(
                "timing.max_wait_ms must not exceed 1000ms".to_string(),
            ));
        }
        if self.timing.connect_timeout.is_zero() {
            return Err(CronError::Config(
                "timing.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database configuration (§6: `database_name`, `enable_superuser_jobs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the embedded SQLite database file.
    pub path: PathBuf,
    /// Identities treated as privileged for the permission discipline in
    /// §4.3 ("only a privileged identity may specify another user").
    #[serde(default)]
    pub superuser_names: Vec<String>,
    /// When false, jobs owned by a privileged identity are rejected on
    /// insert and skipped (with a warning) on load.
    #[serde(default = "default_true")]
    pub enable_superuser_jobs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cronq.db"),
            superuser_names: Vec::new(),
            enable_superuser_jobs: true,
        }
    }
}

/// Timing configuration (§6: `connect_timeout_ms`, `max_wait_ms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(with = "millis_serde", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "millis_serde", rename = "max_wait_ms")]
    pub max_wait: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            max_wait: Duration::from_millis(1_000),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Serde helper for `Duration` stored as milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
