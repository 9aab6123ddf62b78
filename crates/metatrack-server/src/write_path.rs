//! Metadata write service.
//!
//! Every successful write marks the owning entity for reconciliation. The
//! write's own result is all a caller ever sees; reconciliation runs later
//! and its failures stay in the background.

use metatrack_db_memory::InMemoryStore;
use metatrack_reconciler::Enqueuer;
use metatrack_storage::{
    Bindings, DynStore, Row, Statement, StorageError, StorageResult, StoreExecutor, Value,
};
use tracing::{debug, instrument};

pub const UPSERT_RUN: Statement = Statement::new(
    "upsert_experiment_run",
    "INSERT INTO experiment_run (id, experiment_id, date_updated) VALUES ($1, $2, $3) \
     ON CONFLICT (id) DO UPDATE SET date_updated = EXCLUDED.date_updated \
     WHERE experiment_run.experiment_id = EXCLUDED.experiment_id",
);

pub const UPDATE_EXPERIMENT: Statement = Statement::new(
    "update_experiment",
    "UPDATE experiment SET date_updated = $3, version_number = version_number + 1 \
     WHERE id = $1 AND project_id = $2",
);

/// Writes runs and experiments, enqueueing their parents.
#[derive(Clone)]
pub struct RunWriter {
    store: DynStore,
    experiments: Enqueuer<String>,
    projects: Enqueuer<String>,
}

impl RunWriter {
    pub fn new(store: DynStore, experiments: Enqueuer<String>, projects: Enqueuer<String>) -> Self {
        Self {
            store,
            experiments,
            projects,
        }
    }

    /// Creates or updates a run, then marks its experiment for reconciliation.
    ///
    /// Returns the number of rows written. A run that already belongs to a
    /// different experiment is left untouched and nothing is enqueued.
    #[instrument(skip(self))]
    pub async fn record_run_update(
        &self,
        run_id: &str,
        experiment_id: &str,
        date_updated: i64,
    ) -> StorageResult<u64> {
        let written = self
            .store
            .execute_batch(
                &UPSERT_RUN,
                vec![
                    Bindings::new()
                        .bind(run_id)
                        .bind(experiment_id)
                        .bind(date_updated),
                ],
            )
            .await?;

        if written > 0 {
            self.experiments.insert(experiment_id.to_string());
            debug!("Experiment marked for timestamp reconciliation");
        }
        Ok(written)
    }

    /// Updates an experiment, then marks its project for reconciliation.
    #[instrument(skip(self))]
    pub async fn record_experiment_update(
        &self,
        experiment_id: &str,
        project_id: &str,
        date_updated: i64,
    ) -> StorageResult<u64> {
        let written = self
            .store
            .execute_batch(
                &UPDATE_EXPERIMENT,
                vec![
                    Bindings::new()
                        .bind(experiment_id)
                        .bind(project_id)
                        .bind(date_updated),
                ],
            )
            .await?;

        if written > 0 {
            self.projects.insert(project_id.to_string());
            debug!("Project marked for timestamp reconciliation");
        }
        Ok(written)
    }

    /// Installs the in-memory emulation of the write statements.
    pub fn register_in_memory(store: InMemoryStore) -> InMemoryStore {
        store
            .with_update(UPSERT_RUN.name, |tables, bindings| {
                let (run_id, experiment_id, date_updated) = three_args(&UPSERT_RUN, bindings)?;
                if let Some(existing) = tables.get_mut("experiment_run", run_id) {
                    if existing.get("experiment_id").and_then(Value::as_str) != Some(experiment_id)
                    {
                        return Ok(0);
                    }
                    existing.set("date_updated", date_updated);
                    return Ok(1);
                }
                if tables.get("experiment", experiment_id).is_none() {
                    return Err(StorageError::query(
                        UPSERT_RUN.name,
                        format!("experiment {experiment_id} does not exist"),
                    ));
                }
                let run = Row::new()
                    .with("experiment_id", experiment_id)
                    .with("date_updated", date_updated);
                tables.upsert("experiment_run", run_id, run);
                Ok(1)
            })
            .with_update(UPDATE_EXPERIMENT.name, |tables, bindings| {
                let (experiment_id, project_id, date_updated) =
                    three_args(&UPDATE_EXPERIMENT, bindings)?;
                let Some(experiment) = tables.get_mut("experiment", experiment_id) else {
                    return Ok(0);
                };
                if experiment.get("project_id").and_then(Value::as_str) != Some(project_id) {
                    return Ok(0);
                }
                let version = experiment
                    .get("version_number")
                    .and_then(Value::as_i64)
                    .unwrap_or(1);
                experiment.set("date_updated", date_updated);
                experiment.set("version_number", version + 1);
                Ok(1)
            })
    }
}

fn three_args<'a>(
    stmt: &Statement,
    bindings: &'a Bindings,
) -> Result<(&'a str, &'a str, i64), StorageError> {
    let missing =
        |idx: usize| StorageError::query(stmt.name, format!("missing or mistyped ${idx}"));
    let first = bindings.get(0).and_then(Value::as_str).ok_or_else(|| missing(1))?;
    let second = bindings.get(1).and_then(Value::as_str).ok_or_else(|| missing(2))?;
    let third = bindings.get(2).and_then(Value::as_i64).ok_or_else(|| missing(3))?;
    Ok((first, second, third))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metatrack_reconciler::PendingKeySet;
    use std::sync::Arc;
    use tokio_test::block_on;

    struct Fixture {
        store: Arc<InMemoryStore>,
        experiments: Arc<PendingKeySet<String>>,
        projects: Arc<PendingKeySet<String>>,
        writer: RunWriter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(RunWriter::register_in_memory(InMemoryStore::new()));
        let experiments = Arc::new(PendingKeySet::new());
        let projects = Arc::new(PendingKeySet::new());
        let writer = RunWriter::new(
            store.clone(),
            Enqueuer::new(Arc::clone(&experiments)),
            Enqueuer::new(Arc::clone(&projects)),
        );
        block_on(store.upsert(
            "experiment",
            "e1",
            Row::new()
                .with("project_id", "p1")
                .with("date_updated", 1_i64)
                .with("version_number", 1_i64),
        ));
        Fixture {
            store,
            experiments,
            projects,
            writer,
        }
    }

    #[test]
    fn run_write_enqueues_its_experiment() {
        let f = fixture();
        block_on(async {
            assert_eq!(f.writer.record_run_update("r1", "e1", 10).await.unwrap(), 1);
            assert_eq!(f.writer.record_run_update("r1", "e1", 20).await.unwrap(), 1);

            let run = f.store.get("experiment_run", "r1").await.unwrap();
            assert_eq!(run.get_i64("date_updated").unwrap(), 20);
        });
        assert_eq!(f.experiments.drain(10), vec!["e1".to_string()]);
        assert!(f.projects.is_empty());
    }

    #[test]
    fn run_cannot_move_between_experiments() {
        let f = fixture();
        block_on(async {
            f.store
                .upsert("experiment", "e2", Row::new().with("project_id", "p1"))
                .await;
            f.writer.record_run_update("r1", "e1", 10).await.unwrap();
            f.experiments.drain(10);

            assert_eq!(f.writer.record_run_update("r1", "e2", 30).await.unwrap(), 0);
        });
        assert!(f.experiments.is_empty());
    }

    #[test]
    fn experiment_write_enqueues_its_project() {
        let f = fixture();
        block_on(async {
            let written = f
                .writer
                .record_experiment_update("e1", "p1", 50)
                .await
                .unwrap();
            assert_eq!(written, 1);

            let experiment = f.store.get("experiment", "e1").await.unwrap();
            assert_eq!(experiment.get_i64("date_updated").unwrap(), 50);
            assert_eq!(experiment.get_i64("version_number").unwrap(), 2);
        });
        assert!(f.projects.contains(&"p1".to_string()));
        assert!(f.experiments.is_empty());
    }

    #[test]
    fn failed_write_enqueues_nothing() {
        let f = fixture();
        f.store.fail_next_writes(1);
        let err = block_on(f.writer.record_run_update("r1", "e1", 10)).unwrap_err();
        assert!(err.is_transient());
        assert!(f.experiments.is_empty());
    }
}
