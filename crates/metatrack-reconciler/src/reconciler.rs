//! Worker scheduler: recurring drain/reconcile cycles plus the resync scan.
//!
//! Each [`Reconciler`] owns two recurring tasks on the shared [`WorkerPool`],
//! both bound to one cancellation token:
//!
//! ```text
//!   Stopped --start()--> Scheduled --tick--> Running --done--> Scheduled ...
//!      ^                                                           |
//!      +------------------------- stop() -------------------------+
//!
//!   scanner:  Idle --tick--> Scanning --done--> Idle ...
//! ```
//!
//! `Scheduled` and `Stopped` are read from the live cancellation token, not
//! stored, so a cycle finishing after `stop()` or across a restart reports
//! whatever the current lifecycle is.
//!
//! Failed batches are not re-inserted. The resync scan rediscovers anything
//! still stale from the store itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use crate::job::{Job, ReconcileOutcome};
use crate::pending::{Enqueuer, PendingKeySet};
use crate::pool::WorkerPool;

/// Lifecycle state of the drain/reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Stopped,
    Scheduled,
    Running,
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// State of the resync scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Scanning,
}

/// What one drain/reconcile cycle did.
#[derive(Debug)]
pub enum CycleReport {
    /// Nothing was pending; the store was not touched.
    Idle,
    /// The batch was applied.
    Reconciled(ReconcileOutcome),
    /// The batch failed and was dropped; resync will find it again.
    Failed { keys: usize, error: ReconcileError },
    /// The worker pool was closed before the cycle could run.
    Shutdown,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Object-safe view of a reconciler, for hosts managing several jobs.
#[async_trait]
pub trait ReconcilerHandle: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self);
    fn stop(&self);
    async fn wait_stopped(&self, timeout: Duration) -> bool;
    fn state(&self) -> ReconcilerState;
    fn pending_len(&self) -> usize;
}

struct Inner<J: Job> {
    job: J,
    config: ReconcilerConfig,
    pending: Arc<PendingKeySet<J::Key>>,
    pool: WorkerPool,
    /// Held for the whole of a cycle: one active cycle per instance
    cycle_lock: tokio::sync::Mutex<()>,
    scan_lock: tokio::sync::Mutex<()>,
    /// Set while a cycle holds `cycle_lock` and a pool permit
    cycling: AtomicBool,
    scanner: AtomicU8,
}

#[derive(Default)]
struct Lifecycle {
    token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// A reconciler instance for one job.
pub struct Reconciler<J: Job> {
    inner: Arc<Inner<J>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<J: Job> fmt::Debug for Reconciler<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("job", &self.inner.job.name())
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl<J: Job> Reconciler<J> {
    pub fn new(job: J, config: ReconcilerConfig, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                job,
                config,
                pending: Arc::new(PendingKeySet::new()),
                pool,
                cycle_lock: tokio::sync::Mutex::new(()),
                scan_lock: tokio::sync::Mutex::new(()),
                cycling: AtomicBool::new(false),
                scanner: AtomicU8::new(ScannerState::Idle as u8),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.job.name()
    }

    pub fn job(&self) -> &J {
        &self.inner.job
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.inner.config
    }

    /// Handle for write paths.
    pub fn enqueuer(&self) -> Enqueuer<J::Key> {
        Enqueuer::new(Arc::clone(&self.inner.pending))
    }

    /// Marks `key` as needing reconciliation. Never fails.
    pub fn insert(&self, key: J::Key) {
        self.inner.pending.insert(key);
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn state(&self) -> ReconcilerState {
        if self.inner.cycling.load(Ordering::SeqCst) {
            return ReconcilerState::Running;
        }
        let lifecycle = self.lifecycle.lock();
        match &lifecycle.token {
            Some(token) if !token.is_cancelled() && !self.inner.pool.is_closed() => {
                ReconcilerState::Scheduled
            }
            _ => ReconcilerState::Stopped,
        }
    }

    pub fn scanner_state(&self) -> ScannerState {
        if self.inner.scanner.load(Ordering::SeqCst) == ScannerState::Scanning as u8 {
            ScannerState::Scanning
        } else {
            ScannerState::Idle
        }
    }

    /// Schedules the cycle and resync tasks on the pool.
    ///
    /// Calling `start` on a running reconciler does nothing. A disabled
    /// reconciler schedules nothing; keys inserted meanwhile stay pending
    /// until a later start with an enabled configuration.
    pub fn start(&self) {
        let name = self.name();
        let config = &self.inner.config;

        if !config.enabled {
            info!(reconciler = name, "Reconciler disabled; cycles will not run");
            return;
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.token.is_some() {
            debug!(reconciler = name, "Reconciler already started");
            return;
        }

        let token = CancellationToken::new();

        let cycles = self
            .inner
            .pool
            .spawn(cycle_loop(Arc::clone(&self.inner), token.clone()));
        let scans = self
            .inner
            .pool
            .spawn(resync_loop(Arc::clone(&self.inner), token.clone()));

        lifecycle.tasks.push(cycles);
        lifecycle.tasks.push(scans);
        lifecycle.token = Some(token);

        info!(
            reconciler = name,
            initial_delay_ms = config.initial_delay_ms,
            recurring_interval_ms = config.recurring_interval_ms,
            resync_interval_ms = config.resync_interval_ms,
            max_sync = config.max_sync,
            "Reconciler started"
        );
    }

    /// Cancels all future cycles and scans.
    ///
    /// Idempotent. A cycle or scan already in flight is not interrupted;
    /// use [`Reconciler::wait_stopped`] to wait for it.
    pub fn stop(&self) {
        let Some(token) = self.lifecycle.lock().token.take() else {
            return;
        };
        token.cancel();
        info!(
            reconciler = self.name(),
            pending = self.pending_len(),
            "Reconciler stopped"
        );
    }

    /// Waits for the background tasks to exit after [`Reconciler::stop`].
    ///
    /// Returns `true` if every task finished within `timeout`.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let tasks = std::mem::take(&mut self.lifecycle.lock().tasks);
        if tasks.is_empty() {
            return true;
        }
        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    reconciler = self.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Reconciler tasks still running after timeout"
                );
                false
            }
        }
    }

    /// Runs one drain/reconcile cycle now.
    ///
    /// Serialized with the scheduled cycles of this instance.
    pub async fn run_cycle(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    /// Runs one resync scan now. Returns the number of keys enqueued.
    pub async fn run_resync(&self) -> Result<usize, ReconcileError> {
        self.inner.run_resync().await
    }
}

#[async_trait]
impl<J: Job> ReconcilerHandle for Reconciler<J> {
    fn name(&self) -> &'static str {
        Reconciler::name(self)
    }

    fn start(&self) {
        Reconciler::start(self);
    }

    fn stop(&self) {
        Reconciler::stop(self);
    }

    async fn wait_stopped(&self, timeout: Duration) -> bool {
        Reconciler::wait_stopped(self, timeout).await
    }

    fn state(&self) -> ReconcilerState {
        Reconciler::state(self)
    }

    fn pending_len(&self) -> usize {
        Reconciler::pending_len(self)
    }
}

impl<J: Job> Inner<J> {
    #[instrument(skip(self), fields(reconciler = self.job.name()))]
    async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let Ok(_permit) = self.pool.acquire().await else {
            return CycleReport::Shutdown;
        };

        self.cycling.store(true, Ordering::SeqCst);
        let _running = ResetOnDrop(&self.cycling);

        let batch = self.pending.drain(self.config.max_sync);
        if batch.is_empty() {
            CycleReport::Idle
        } else {
            self.apply(batch).await
        }
    }

    /// Submits the batch as its own task so the store write runs to
    /// completion even if this cycle is dropped.
    async fn apply(self: &Arc<Self>, batch: Vec<J::Key>) -> CycleReport {
        let name = self.job.name();
        let batch_size = batch.len();
        let started = Instant::now();

        let inner = Arc::clone(self);
        let submitted = self
            .pool
            .spawn(async move { inner.job.reconcile(&batch).await });

        let result = match submitted.await {
            Ok(result) => result,
            Err(e) => Err(ReconcileError::job(name, format!("reconcile task failed: {e}"))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                info!(
                    reconciler = name,
                    batch_size,
                    rows_affected = outcome.rows_affected,
                    elapsed_ms,
                    "Reconcile batch applied"
                );
                CycleReport::Reconciled(outcome)
            }
            Err(error) => {
                warn!(
                    reconciler = name,
                    batch_size,
                    elapsed_ms,
                    transient = error.is_transient(),
                    error = %error,
                    "Reconcile batch failed; keys left for the next resync"
                );
                CycleReport::Failed {
                    keys: batch_size,
                    error,
                }
            }
        }
    }

    #[instrument(skip(self), fields(reconciler = self.job.name()))]
    async fn run_resync(self: &Arc<Self>) -> Result<usize, ReconcileError> {
        let _scan = self.scan_lock.lock().await;
        let _permit = self.pool.acquire().await?;

        self.scanner
            .store(ScannerState::Scanning as u8, Ordering::SeqCst);
        let started = Instant::now();

        // Runs as its own task: a panicking scan fails this pass only
        let inner = Arc::clone(self);
        let scan = self.pool.spawn(async move {
            let enqueuer = Enqueuer::new(Arc::clone(&inner.pending));
            inner.job.resync(&enqueuer, inner.config.max_sync).await
        });
        let result = match scan.await {
            Ok(result) => result,
            Err(e) => Err(ReconcileError::job(
                self.job.name(),
                format!("resync task failed: {e}"),
            )),
        };
        self.scanner.store(ScannerState::Idle as u8, Ordering::SeqCst);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(found) => info!(
                reconciler = self.job.name(),
                found,
                pending = self.pending.len(),
                elapsed_ms,
                "Resync scan completed"
            ),
            Err(error) => warn!(
                reconciler = self.job.name(),
                elapsed_ms,
                error = %error,
                "Resync scan failed"
            ),
        }
        result
    }
}

async fn cycle_loop<J: Job>(inner: Arc<Inner<J>>, token: CancellationToken) {
    let name = inner.job.name();

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(reconciler = name, "Interrupted during initial delay");
            return;
        }
        _ = tokio::time::sleep(inner.config.initial_delay()) => {}
    }

    let mut ticker = interval(inner.config.recurring_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(reconciler = name, "Cycle wait interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        if let CycleReport::Shutdown = inner.run_cycle().await {
            break;
        }
    }
}

/// Clears the flag when the cycle ends, including when its future is dropped.
struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn resync_loop<J: Job>(inner: Arc<Inner<J>>, token: CancellationToken) {
    let name = inner.job.name();
    let period = inner.config.resync_interval();

    let mut ticker = if inner.config.resync_on_startup {
        interval(period)
    } else {
        interval_at(tokio::time::Instant::now() + period, period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(reconciler = name, "Resync wait interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        // Failures are logged inside; the next tick retries
        if let Err(ReconcileError::Shutdown) = inner.run_resync().await {
            break;
        }
    }
}
