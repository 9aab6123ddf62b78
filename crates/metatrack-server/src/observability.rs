//! Tracing setup.
//!
//! The subscriber is installed before the configuration is read, with
//! startup directives, and narrowed to the `[logging]` section once it is
//! loaded. `RUST_LOG`, when set, wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

/// Used until the configuration is loaded.
const STARTUP_DIRECTIVES: &str = "info,sqlx=warn";

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    let filter = env_override().unwrap_or_else(|| EnvFilter::new(STARTUP_DIRECTIVES));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER.set(handle);

    // Thread names identify the pool worker running each cycle
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .try_init();
}

fn env_override() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Filter directives for a `[logging]` section.
pub fn directives(logging: &LoggingConfig) -> String {
    let mut directives = format!("{},sqlx={}", logging.level, logging.sqlx_level);
    if let Some(cycles) = &logging.cycle_level {
        directives.push_str(",metatrack_reconciler=");
        directives.push_str(cycles);
    }
    directives
}

/// Swaps the startup filter for the configured one.
pub fn apply_logging(logging: &LoggingConfig) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    let directives = directives(logging);
    match EnvFilter::try_new(&directives) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                tracing::warn!(error = %e, "Failed to apply logging configuration");
            }
        }
        Err(e) => tracing::warn!(%directives, error = %e, "Invalid logging directives"),
    }
}
