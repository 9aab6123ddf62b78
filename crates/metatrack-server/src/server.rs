use std::future::Future;
use std::sync::Arc;

use metatrack_db_memory::InMemoryStore;
use metatrack_db_postgres::PostgresStore;
use metatrack_reconciler::WorkerPool;
use metatrack_storage::{DynStore, StorageError};
use tracing::info;

use crate::config::{AppConfig, StorageBackend, StorageConfig};
use crate::reconcilers::{self, ReconcilerSet};
use crate::shutdown::{GracefulShutdown, ShutdownOutcome};
use crate::write_path::RunWriter;

/// Store with every statement the service issues registered.
pub fn memory_store() -> InMemoryStore {
    let store = reconcilers::register_in_memory(InMemoryStore::new());
    RunWriter::register_in_memory(store)
}

/// Connects the configured storage backend.
pub async fn connect_storage(config: &StorageConfig) -> Result<DynStore, StorageError> {
    match config.backend {
        StorageBackend::Postgres => {
            let store: DynStore = Arc::new(PostgresStore::new(config.postgres.clone()).await?);
            info!(pool_size = config.postgres.pool_size, "PostgreSQL storage connected");
            Ok(store)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is not persisted");
            let store: DynStore = Arc::new(memory_store());
            Ok(store)
        }
    }
}

pub struct MetatrackServer {
    config: AppConfig,
    store: DynStore,
    reconcilers: Arc<ReconcilerSet>,
    writer: RunWriter,
}

impl MetatrackServer {
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn reconcilers(&self) -> &Arc<ReconcilerSet> {
        &self.reconcilers
    }

    /// Write service for request handlers.
    pub fn writer(&self) -> &RunWriter {
        &self.writer
    }

    /// Starts the reconcilers, waits for `signal`, then shuts down gracefully.
    pub async fn run<F>(self, signal: F) -> anyhow::Result<ShutdownOutcome>
    where
        F: Future<Output = ()>,
    {
        self.reconcilers.start_all();
        let shutdown = GracefulShutdown::new(
            Arc::clone(&self.reconcilers),
            self.config.shutdown.timeout(),
        );
        Ok(shutdown.run_until(signal).await)
    }
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    store: Option<DynStore>,
    pool: Option<WorkerPool>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses `store` instead of connecting the configured backend.
    pub fn with_store(mut self, store: DynStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `pool` instead of a pool on the current runtime.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Connects storage and wires the reconcilers. Nothing is scheduled yet.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build(self) -> anyhow::Result<MetatrackServer> {
        let store = match self.store {
            Some(store) => store,
            None => connect_storage(&self.config.storage).await?,
        };
        let pool = self
            .pool
            .unwrap_or_else(|| WorkerPool::current(self.config.reconcilers.pool_size()));

        let reconcilers = Arc::new(ReconcilerSet::new(
            &self.config.reconcilers,
            Arc::clone(&store),
            pool,
        ));
        let writer = RunWriter::new(
            Arc::clone(&store),
            reconcilers.experiment_timestamp(),
            reconcilers.project_timestamp(),
        );

        Ok(MetatrackServer {
            config: self.config,
            store,
            reconcilers,
            writer,
        })
    }
}
