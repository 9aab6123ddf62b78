//! Per-reconciler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one reconciler instance.
///
/// Immutable once the reconciler is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Turns the whole mechanism on or off. When false no cycle or scan ever runs.
    pub enabled: bool,

    /// Delay before the first drain/reconcile cycle, in milliseconds.
    pub initial_delay_ms: u64,

    /// Period of the drain/reconcile cycle, in milliseconds.
    pub recurring_interval_ms: u64,

    /// Period of the resync scan, in milliseconds.
    pub resync_interval_ms: u64,

    /// Run one resync scan as soon as the reconciler starts.
    pub resync_on_startup: bool,

    /// Maximum keys per drained batch; also the scan fetch size.
    pub max_sync: usize,

    /// Size of the shared worker pool this reconciler asks for.
    pub worker_count: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 0,
            recurring_interval_ms: 1_000,
            resync_interval_ms: 60_000,
            resync_on_startup: true,
            max_sync: 10_000,
            worker_count: 10,
        }
    }
}

impl ReconcilerConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn recurring_interval(&self) -> Duration {
        Duration::from_millis(self.recurring_interval_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.recurring_interval_ms == 0 {
            return Err("recurring_interval_ms must be > 0".into());
        }
        if self.resync_interval_ms == 0 {
            return Err("resync_interval_ms must be > 0".into());
        }
        if self.max_sync == 0 {
            return Err("max_sync must be > 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be > 0".into());
        }
        Ok(())
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_recurring_interval_ms(mut self, ms: u64) -> Self {
        self.recurring_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn with_resync_interval_ms(mut self, ms: u64) -> Self {
        self.resync_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn with_resync_on_startup(mut self, run: bool) -> Self {
        self.resync_on_startup = run;
        self
    }

    #[must_use]
    pub fn with_max_sync(mut self, max_sync: usize) -> Self {
        self.max_sync = max_sync;
        self
    }

    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}
