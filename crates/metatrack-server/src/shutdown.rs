//! Graceful shutdown of the background reconcilers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reconcilers::ReconcilerSet;

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight cycle and scan finished before the timeout.
    Clean,
    /// The timeout elapsed first; remaining work is abandoned with the runtime.
    TimedOut,
}

/// Stops scheduling, then waits a bounded time for in-flight work.
pub struct GracefulShutdown {
    reconcilers: Arc<ReconcilerSet>,
    timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(reconcilers: Arc<ReconcilerSet>, timeout: Duration) -> Self {
        Self {
            reconcilers,
            timeout,
        }
    }

    /// Waits for `signal`, then shuts down.
    pub async fn run_until<F>(self, signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("shutdown signal received");
        self.shutdown().await
    }

    pub async fn shutdown(&self) -> ShutdownOutcome {
        let started = Instant::now();
        self.reconcilers.stop_all();

        let active = self.reconcilers.pool().size() - self.reconcilers.pool().available();
        info!(
            active,
            pending = self.reconcilers.pending_len(),
            timeout_secs = self.timeout.as_secs(),
            "Waiting for in-flight reconciliation"
        );

        let clean = self.reconcilers.wait_stopped(self.timeout).await;
        self.reconcilers.pool().close();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if clean {
            info!(elapsed_ms, "Reconcilers shut down");
            ShutdownOutcome::Clean
        } else {
            warn!(
                elapsed_ms,
                timeout_secs = self.timeout.as_secs(),
                "Reconcilers did not stop within the timeout; proceeding with forceful shutdown"
            );
            ShutdownOutcome::TimedOut
        }
    }
}

/// Resolves on Ctrl-C or when `token` is cancelled.
pub async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                token.cancelled().await;
            }
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilersConfig;
    use async_trait::async_trait;
    use metatrack_reconciler::WorkerPool;
    use metatrack_storage::{Bindings, Row, RowStream, Statement, StorageError, StoreExecutor};

    /// Store whose writes never complete.
    struct StalledStore;

    #[async_trait]
    impl StoreExecutor for StalledStore {
        fn stream<'a>(&'a self, _stmt: &'a Statement, _fetch_size: usize) -> RowStream<'a> {
            Box::pin(futures_util::stream::empty::<Result<Row, StorageError>>())
        }

        async fn execute_batch(
            &self,
            _stmt: &Statement,
            _bindings: Vec<Bindings>,
        ) -> Result<u64, StorageError> {
            std::future::pending().await
        }
    }

    fn reconcilers() -> Arc<ReconcilerSet> {
        Arc::new(ReconcilerSet::new(
            &ReconcilersConfig::default(),
            Arc::new(StalledStore),
            WorkerPool::current(2),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_reconcilers_shut_down_cleanly() {
        let set = reconcilers();
        set.start_all();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = GracefulShutdown::new(Arc::clone(&set), Duration::from_secs(1))
            .shutdown()
            .await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_cycle_times_out() {
        let set = reconcilers();
        set.experiment_timestamp().insert("e1".to_string());
        set.start_all();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = GracefulShutdown::new(Arc::clone(&set), Duration::from_secs(1))
            .shutdown()
            .await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_waits_for_the_signal() {
        let set = reconcilers();
        set.start_all();
        let token = CancellationToken::new();
        let shutdown = GracefulShutdown::new(Arc::clone(&set), Duration::from_secs(1));
        let task = tokio::spawn(shutdown.run_until(shutdown_signal(token.clone())));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());

        token.cancel();
        assert_eq!(task.await.unwrap(), ShutdownOutcome::Clean);
    }
}
