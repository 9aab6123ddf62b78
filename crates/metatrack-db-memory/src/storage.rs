use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::Stream;
use metatrack_storage::{Bindings, Row, RowStream, Statement, StorageError, StoreExecutor};
use tokio::sync::RwLock;
use tracing::debug;

use crate::tables::Tables;

/// Handler emulating a read-only statement.
pub type QueryHandler = Arc<dyn Fn(&Tables) -> Vec<Row> + Send + Sync>;

/// Handler emulating one execution of a write statement.
pub type UpdateHandler =
    Arc<dyn Fn(&mut Tables, &Bindings) -> Result<u64, StorageError> + Send + Sync>;

/// In-memory store implementing [`StoreExecutor`].
///
/// Statements are dispatched by name to registered handlers, so callers that
/// carry SQL for a relational backend can run unchanged against this store.
/// Used by tests and by single-node deployments.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    queries: HashMap<&'static str, QueryHandler>,
    updates: HashMap<&'static str, UpdateHandler>,
    /// Number of upcoming `execute_batch` calls that fail with a connection error
    fail_writes: AtomicU32,
    write_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("updates", &self.updates.keys().collect::<Vec<_>>())
            .field("write_calls", &self.write_calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            queries: HashMap::new(),
            updates: HashMap::new(),
            fail_writes: AtomicU32::new(0),
            write_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        }
    }

    /// Registers the implementation of a read-only statement.
    #[must_use]
    pub fn with_query<F>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(&Tables) -> Vec<Row> + Send + Sync + 'static,
    {
        self.queries.insert(name, Arc::new(handler));
        self
    }

    /// Registers the implementation of a write statement.
    #[must_use]
    pub fn with_update<F>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(&mut Tables, &Bindings) -> Result<u64, StorageError> + Send + Sync + 'static,
    {
        self.updates.insert(name, Arc::new(handler));
        self
    }

    /// Inserts or replaces a row.
    pub async fn upsert(&self, table: &str, pk: impl Into<String>, row: Row) {
        self.tables.write().await.upsert(table, pk, row);
    }

    /// Reads a row by primary key.
    pub async fn get(&self, table: &str, pk: &str) -> Option<Row> {
        self.tables.read().await.get(table, pk).cloned()
    }

    /// Returns a copy of every row in a table, in primary-key order.
    pub async fn table_rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .rows(table)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Makes the next `n` batched writes fail with a connection error.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Number of `execute_batch` calls so far, failed ones included.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Number of non-empty pages served to streams so far.
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Evaluates `stmt` on first poll, then serves its rows `fetch_size` at a time.
    fn pages<'a>(
        &'a self,
        stmt: &'a Statement,
        fetch_size: usize,
    ) -> impl Stream<Item = Result<Row, StorageError>> + Send + 'a {
        try_stream! {
            let handler = self
                .queries
                .get(stmt.name)
                .ok_or_else(|| StorageError::unknown_statement(stmt.name))?;
            let rows = handler(&*self.tables.read().await);
            debug!(statement = %stmt, rows = rows.len(), "In-memory query evaluated");

            let mut source = rows.into_iter();
            loop {
                let page: Vec<Row> = source.by_ref().take(fetch_size).collect();
                if page.is_empty() {
                    break;
                }
                self.fetch_calls.fetch_add(1, Ordering::SeqCst);
                for row in page {
                    yield row;
                }
            }
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StoreExecutor for InMemoryStore {
    fn stream<'a>(&'a self, stmt: &'a Statement, fetch_size: usize) -> RowStream<'a> {
        Box::pin(self.pages(stmt, fetch_size.max(1)))
    }

    async fn execute_batch(
        &self,
        stmt: &Statement,
        bindings: Vec<Bindings>,
    ) -> Result<u64, StorageError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_injected_failure() {
            return Err(StorageError::connection("injected write failure"));
        }

        let handler = self
            .updates
            .get(stmt.name)
            .ok_or_else(|| StorageError::unknown_statement(stmt.name))?;

        if bindings.is_empty() {
            return Ok(0);
        }

        let mut guard = self.tables.write().await;
        // Apply against a scratch copy so a failing binding leaves nothing behind
        let mut scratch = guard.clone();
        let mut affected = 0;
        for binding in &bindings {
            affected += handler(&mut scratch, binding)?;
        }
        *guard = scratch;

        debug!(
            statement = %stmt,
            bindings = bindings.len(),
            affected,
            "In-memory batch applied"
        );

        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use metatrack_storage::Value;

    const ALL_ITEMS: Statement = Statement::new("all_items", "SELECT id FROM item");
    const BUMP_ITEM: Statement = Statement::new(
        "bump_item",
        "UPDATE item SET n = n + 1 WHERE id = $1",
    );

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_query(ALL_ITEMS.name, |tables| {
                tables
                    .rows("item")
                    .map(|(pk, _)| Row::new().with("id", pk))
                    .collect()
            })
            .with_update(BUMP_ITEM.name, |tables, bindings| {
                let id = bindings
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| StorageError::query("bump_item", "missing $1"))?
                    .to_string();
                let row = tables
                    .get_mut("item", &id)
                    .ok_or_else(|| StorageError::query("bump_item", format!("no item {id}")))?;
                let n = row.get_i64("n")?;
                row.set("n", n + 1);
                Ok(1)
            })
    }

    async fn seed(store: &InMemoryStore, count: usize) {
        for i in 0..count {
            let id = format!("item-{i:03}");
            store
                .upsert("item", id.clone(), Row::new().with("id", id).with("n", 0_i64))
                .await;
        }
    }

    #[tokio::test]
    async fn test_stream_pages_by_fetch_size() {
        let store = store();
        seed(&store, 25).await;

        let rows: Vec<Row> = store.stream(&ALL_ITEMS, 10).try_collect().await.unwrap();

        assert_eq!(rows.len(), 25);
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_zero_fetch_size_is_one() {
        let store = store();
        seed(&store, 2).await;

        let rows: Vec<Row> = store.stream(&ALL_ITEMS, 0).try_collect().await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(store.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_statement() {
        let store = InMemoryStore::new();
        let result: Result<Vec<Row>, _> = store.stream(&ALL_ITEMS, 10).try_collect().await;
        assert!(matches!(result, Err(StorageError::UnknownStatement { .. })));

        let result = store.execute_batch(&BUMP_ITEM, vec![]).await;
        assert!(matches!(result, Err(StorageError::UnknownStatement { .. })));
    }

    #[tokio::test]
    async fn test_batch_applies_all_bindings() {
        let store = store();
        seed(&store, 2).await;

        let affected = store
            .execute_batch(
                &BUMP_ITEM,
                vec![
                    Bindings::new().bind("item-000"),
                    Bindings::new().bind("item-001"),
                    Bindings::new().bind("item-000"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(affected, 3);
        let row = store.get("item", "item-000").await.unwrap();
        assert_eq!(row.get_i64("n").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = store();
        seed(&store, 1).await;

        let result = store
            .execute_batch(
                &BUMP_ITEM,
                vec![Bindings::new().bind("item-000"), Bindings::new().bind("ghost")],
            )
            .await;

        assert!(result.is_err());
        let row = store.get("item", "item-000").await.unwrap();
        assert_eq!(row.get_i64("n").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = store();
        seed(&store, 1).await;
        store.fail_next_writes(1);

        let first = store
            .execute_batch(&BUMP_ITEM, vec![Bindings::new().bind("item-000")])
            .await;
        assert!(matches!(first, Err(ref e) if e.is_transient()));

        let second = store
            .execute_batch(&BUMP_ITEM, vec![Bindings::new().bind("item-000")])
            .await;
        assert_eq!(second.unwrap(), 1);
        assert_eq!(store.write_calls(), 2);
    }
}
