//! Reconcilers for derived metadata.
//!
//! Write paths only ever see enqueuers. Every reconciler here runs on one
//! shared worker pool:
//! - `experiment_timestamp`: experiment `date_updated` follows its runs
//! - `project_timestamp`: project `date_updated` follows its experiments

pub mod experiment_timestamp;
pub mod project_timestamp;
mod timestamp;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use metatrack_db_memory::InMemoryStore;
use metatrack_reconciler::{Enqueuer, Reconciler, ReconcilerHandle, WorkerPool};
use metatrack_storage::DynStore;
use tracing::info;

use crate::config::ReconcilersConfig;

pub use experiment_timestamp::UpdateExperimentTimestamp;
pub use project_timestamp::UpdateProjectTimestamp;
pub use timestamp::{Hierarchy, ParentTimestampJob};

/// Installs the in-memory emulation of every reconciler statement.
pub fn register_in_memory(store: InMemoryStore) -> InMemoryStore {
    let store = experiment_timestamp::register_in_memory(store);
    project_timestamp::register_in_memory(store)
}

/// All reconcilers of the process.
pub struct ReconcilerSet {
    pool: WorkerPool,
    experiment_timestamp: Arc<Reconciler<UpdateExperimentTimestamp>>,
    project_timestamp: Arc<Reconciler<UpdateProjectTimestamp>>,
}

impl ReconcilerSet {
    pub fn new(config: &ReconcilersConfig, store: DynStore, pool: WorkerPool) -> Self {
        let experiment_timestamp = Reconciler::new(
            experiment_timestamp::job(Arc::clone(&store)),
            config.experiment_timestamp.clone(),
            pool.clone(),
        );
        let project_timestamp = Reconciler::new(
            project_timestamp::job(store),
            config.project_timestamp.clone(),
            pool.clone(),
        );

        Self {
            pool,
            experiment_timestamp: Arc::new(experiment_timestamp),
            project_timestamp: Arc::new(project_timestamp),
        }
    }

    /// Enqueuer taking experiment ids.
    pub fn experiment_timestamp(&self) -> Enqueuer<String> {
        self.experiment_timestamp.enqueuer()
    }

    /// Enqueuer taking project ids.
    pub fn project_timestamp(&self) -> Enqueuer<String> {
        self.project_timestamp.enqueuer()
    }

    pub fn experiment_reconciler(&self) -> &Reconciler<UpdateExperimentTimestamp> {
        &self.experiment_timestamp
    }

    pub fn project_reconciler(&self) -> &Reconciler<UpdateProjectTimestamp> {
        &self.project_timestamp
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn handles(&self) -> Vec<Arc<dyn ReconcilerHandle>> {
        vec![
            Arc::clone(&self.experiment_timestamp) as Arc<dyn ReconcilerHandle>,
            Arc::clone(&self.project_timestamp) as Arc<dyn ReconcilerHandle>,
        ]
    }

    pub fn start_all(&self) {
        let handles = self.handles();
        for handle in &handles {
            handle.start();
        }
        info!(
            reconcilers = handles.len(),
            pool_size = self.pool.size(),
            "Reconcilers started"
        );
    }

    /// Cancels future cycles of every reconciler. In-flight cycles continue.
    pub fn stop_all(&self) {
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Waits for every reconciler's tasks; `true` if all exited in time.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let handles = self.handles();
        let results = join_all(handles.iter().map(|h| h.wait_stopped(timeout))).await;
        results.into_iter().all(|done| done)
    }

    /// Keys waiting across all reconcilers.
    pub fn pending_len(&self) -> usize {
        self.handles().iter().map(|h| h.pending_len()).sum()
    }
}
