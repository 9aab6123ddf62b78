//! Shared, bounded worker pool.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::ReconcileError;

/// Worker pool shared by every reconciler in the process.
///
/// Tasks run on the injected runtime handle; a semaphore of `size` permits
/// bounds how many cycles and scans touch the store at once across all
/// reconcilers. Tests pass a current-thread runtime to get a synchronous pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Creates a pool on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current(size: usize) -> Self {
        Self::new(Handle::current(), size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not held by a running cycle or scan.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuses new work; cycles and scans already holding a permit finish.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, ReconcileError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ReconcileError::Shutdown)
    }
}
