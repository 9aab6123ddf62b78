//! Shared machinery for "parent `date_updated` follows its children" jobs.
//!
//! A parent's `date_updated` must be at least the newest `date_updated` among
//! its children. The key is the parent id alone; the newest child timestamp
//! is recomputed when the batch is applied, so however many child writes hit
//! one parent between cycles, the parent's `version_number` moves by one.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use metatrack_db_memory::{InMemoryStore, Tables};
use metatrack_reconciler::{Enqueuer, Job, ReconcileError, ReconcileOutcome, ReconcileResult};
use metatrack_storage::{Bindings, DynStore, Row, Statement, StorageError, StoreExecutor, Value};
use tracing::debug;

/// A parent table whose timestamp is derived from a child table.
#[derive(Debug, Clone, Copy)]
pub struct Hierarchy {
    pub job_name: &'static str,
    pub parent_table: &'static str,
    pub child_table: &'static str,
    /// Column of the child table referencing the parent id
    pub parent_column: &'static str,
    /// Yields one `id` column per stale parent
    pub find_stale: Statement,
    /// Takes the parent id as `$1`
    pub update_parent: Statement,
}

impl Hierarchy {
    /// Newest child timestamp of `parent_id`, if it has any children.
    fn newest_child(&self, tables: &Tables, parent_id: &str) -> Option<i64> {
        tables
            .rows(self.child_table)
            .filter(|(_, row)| {
                row.get(self.parent_column).and_then(Value::as_str) == Some(parent_id)
            })
            .filter_map(|(_, row)| row.get("date_updated").and_then(Value::as_i64))
            .max()
    }

    fn parent_timestamp(row: &Row) -> i64 {
        row.get("date_updated").and_then(Value::as_i64).unwrap_or(0)
    }

    fn stale_parents(&self, tables: &Tables) -> Vec<Row> {
        tables
            .rows(self.parent_table)
            .filter(|(id, row)| {
                self.newest_child(tables, id)
                    .is_some_and(|newest| newest > Self::parent_timestamp(row))
            })
            .map(|(id, _)| Row::new().with("id", id))
            .collect()
    }

    fn apply_update(&self, tables: &mut Tables, bindings: &Bindings) -> Result<u64, StorageError> {
        let id = bindings
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StorageError::query(self.update_parent.name, "missing parent id at $1")
            })?
            .to_string();

        let Some(newest) = self.newest_child(tables, &id) else {
            return Ok(0);
        };
        let Some(parent) = tables.get_mut(self.parent_table, &id) else {
            return Ok(0);
        };
        if Self::parent_timestamp(parent) >= newest {
            return Ok(0);
        }

        let version = parent
            .get("version_number")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        parent.set("date_updated", newest);
        parent.set("version_number", version + 1);
        Ok(1)
    }

    /// Installs handlers emulating both statements on an in-memory store.
    pub fn register_in_memory(self, store: InMemoryStore) -> InMemoryStore {
        store
            .with_query(self.find_stale.name, move |tables| self.stale_parents(tables))
            .with_update(self.update_parent.name, move |tables, bindings| {
                self.apply_update(tables, bindings)
            })
    }
}

/// Job keeping a parent's timestamp and version in step with its children.
pub struct ParentTimestampJob {
    hierarchy: Hierarchy,
    store: DynStore,
}

impl ParentTimestampJob {
    pub fn new(hierarchy: Hierarchy, store: DynStore) -> Self {
        Self { hierarchy, store }
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }
}

#[async_trait]
impl Job for ParentTimestampJob {
    type Key = String;

    fn name(&self) -> &'static str {
        self.hierarchy.job_name
    }

    async fn resync(
        &self,
        enqueuer: &Enqueuer<String>,
        fetch_size: usize,
    ) -> Result<usize, ReconcileError> {
        let stmt = &self.hierarchy.find_stale;
        let mut rows = self.store.stream(stmt, fetch_size);
        let mut found = 0;
        while let Some(row) = rows.try_next().await? {
            enqueuer.insert(row.get_str("id")?.to_string());
            found += 1;
        }
        Ok(found)
    }

    async fn reconcile(&self, batch: &[String]) -> ReconcileResult {
        debug!(
            reconciler = self.name(),
            parents = ?batch,
            "Reconciling parent timestamps"
        );
        let bindings = batch
            .iter()
            .map(|id| Bindings::new().bind(id.as_str()))
            .collect();
        let rows_affected = self
            .store
            .execute_batch(&self.hierarchy.update_parent, bindings)
            .await?;
        Ok(ReconcileOutcome {
            keys: batch.len(),
            rows_affected,
        })
    }
}
