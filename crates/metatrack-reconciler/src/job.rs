//! The per-job contract implemented once for every kind of derived state.

use async_trait::async_trait;

use crate::error::ReconcileError;
use crate::pending::{Enqueuer, ReconciliationKey};

/// Outcome of one successfully applied batch.
///
/// Per-key results are not tracked: reconciliation is idempotent, so a
/// batch is either applied as a whole or re-derived by the next resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Keys in the batch.
    pub keys: usize,
    /// Rows the store reports as changed. May be lower than `keys` when some
    /// entities were already up to date.
    pub rows_affected: u64,
}

pub type ReconcileResult = Result<ReconcileOutcome, ReconcileError>;

/// A reconciliation job: how to find stale entities and how to fix them.
///
/// Both operations must be derivable purely from the store's current state.
/// Applying `reconcile` to an already-correct key must be a no-op in effect,
/// and applying it twice must converge to the same result.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    type Key: ReconciliationKey;

    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Scans the store for stale entities and enqueues each one.
    ///
    /// Reads at most `fetch_size` rows into memory at a time. Returns the
    /// number of keys enqueued.
    async fn resync(
        &self,
        enqueuer: &Enqueuer<Self::Key>,
        fetch_size: usize,
    ) -> Result<usize, ReconcileError>;

    /// Applies one batch against the store.
    async fn reconcile(&self, batch: &[Self::Key]) -> ReconcileResult;
}
