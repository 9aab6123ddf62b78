//! # metatrack-reconciler
//!
//! Background reconciliation of derived metadata.
//!
//! Write paths mark entities whose derived fields may be stale by inserting
//! a key through an [`Enqueuer`]. Each [`Reconciler`] periodically drains a
//! bounded batch from its [`PendingKeySet`] and hands it to its [`Job`], which
//! recomputes the derived state idempotently against the store. A slower
//! resync scan asks the job to rediscover stale entities straight from the
//! store, which covers keys lost to failed batches or process restarts.
//!
//! All reconcilers in a process share one [`WorkerPool`].
//!
//! ```ignore
//! let pool = WorkerPool::current(config.worker_count);
//! let reconciler = Reconciler::new(MyJob::new(store), config, pool);
//! let enqueuer = reconciler.enqueuer();
//! reconciler.start();
//!
//! enqueuer.insert("experiment-42".to_string());
//! ```

mod config;
mod error;
mod job;
mod pending;
mod pool;
mod reconciler;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use job::{Job, ReconcileOutcome, ReconcileResult};
pub use pending::{Enqueuer, PendingKeySet, ReconciliationKey};
pub use pool::WorkerPool;
pub use reconciler::{CycleReport, Reconciler, ReconcilerHandle, ReconcilerState, ScannerState};
