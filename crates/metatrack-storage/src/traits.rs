//! The execution facade every storage backend implements.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::StorageError;
use crate::types::{Bindings, Row, Statement};

/// A lazily produced sequence of rows.
pub type RowStream<'a> = BoxStream<'a, Result<Row, StorageError>>;

/// Asynchronous execution facade over the authoritative store.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is
/// shared by every reconciler and write path in the process.
///
/// # Example
///
/// ```ignore
/// use futures_util::TryStreamExt;
/// use metatrack_storage::{Statement, StoreExecutor};
///
/// const STALE: Statement = Statement::new("stale", "SELECT id FROM experiment");
///
/// async fn count(store: &dyn StoreExecutor) -> Result<usize, StorageError> {
///     let mut rows = store.stream(&STALE, 500);
///     let mut n = 0;
///     while let Some(_row) = rows.try_next().await? {
///         n += 1;
///     }
///     Ok(n)
/// }
/// ```
#[async_trait]
pub trait StoreExecutor: Send + Sync {
    /// Streams the rows produced by a read-only statement.
    ///
    /// The backend holds at most `fetch_size` rows in memory at a time.
    /// A `fetch_size` of zero is treated as one.
    fn stream<'a>(&'a self, stmt: &'a Statement, fetch_size: usize) -> RowStream<'a>;

    /// Executes `stmt` once per binding set, as a single unit.
    ///
    /// Either every binding set is applied or none is. Returns the total
    /// number of rows affected; an empty `bindings` is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if any execution fails; nothing is applied.
    async fn execute_batch(
        &self,
        stmt: &Statement,
        bindings: Vec<Bindings>,
    ) -> Result<u64, StorageError>;
}
