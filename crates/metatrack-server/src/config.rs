use metatrack_db_postgres::PostgresConfig;
use metatrack_reconciler::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Background reconcilers for derived metadata
    #[serde(default)]
    pub reconcilers: ReconcilersConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Storage validations
        if self.storage.backend == StorageBackend::Postgres {
            if self.storage.postgres.url.is_empty() {
                return Err("storage.postgres.url must be set for the postgres backend".into());
            }
            if self.storage.postgres.pool_size == 0 {
                return Err("storage.postgres.pool_size must be > 0".into());
            }
        }
        // Logging validation
        check_level("logging.level", &self.logging.level)?;
        check_level("logging.sqlx_level", &self.logging.sqlx_level)?;
        if let Some(level) = &self.logging.cycle_level {
            check_level("logging.cycle_level", level)?;
        }
        // Reconciler validations
        self.reconcilers
            .experiment_timestamp
            .validate()
            .map_err(|e| format!("reconcilers.experiment_timestamp.{e}"))?;
        self.reconcilers
            .project_timestamp
            .validate()
            .map_err(|e| format!("reconcilers.project_timestamp.{e}"))?;
        if self.shutdown.timeout_secs == 0 {
            return Err("shutdown.timeout_secs must be > 0".into());
        }
        Ok(())
    }
}

fn check_level(field: &str, level: &str) -> Result<(), String> {
    const VALID_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
    if VALID_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(format!("{field} must be one of {VALID_LEVELS:?}"))
    }
}

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Source(String),

    #[error("config deserialize error: {0}")]
    Deserialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local tables; state is lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Level for sqlx's own statement logging
    #[serde(default = "default_sqlx_level")]
    pub sqlx_level: String,
    /// Overrides `level` for the reconciler engine, whose per-cycle records
    /// are chatty at short intervals.
    #[serde(default)]
    pub cycle_level: Option<String>,
}
fn default_log_level() -> String {
    "info".into()
}
fn default_sqlx_level() -> String {
    "warn".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            sqlx_level: default_sqlx_level(),
            cycle_level: None,
        }
    }
}

/// One entry per reconciliation job.
///
/// Every reconciler runs on one shared worker pool, sized by the largest
/// `worker_count` among the enabled entries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconcilersConfig {
    #[serde(default)]
    pub experiment_timestamp: ReconcilerConfig,
    #[serde(default)]
    pub project_timestamp: ReconcilerConfig,
}

impl ReconcilersConfig {
    fn all(&self) -> [&ReconcilerConfig; 2] {
        [&self.experiment_timestamp, &self.project_timestamp]
    }

    /// Size of the shared worker pool; at least one worker.
    pub fn pool_size(&self) -> usize {
        self.all()
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| c.worker_count)
            .max()
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight cycles after a shutdown signal
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}
fn default_shutdown_timeout_secs() -> u64 {
    30
}
impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}
impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "metatrack.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., METATRACK__SHUTDOWN__TIMEOUT_SECS=5
        builder = builder.add_source(
            Environment::with_prefix("METATRACK")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Source(e.to_string()))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate().map_err(ConfigError::Invalid)?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, ConfigError> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
