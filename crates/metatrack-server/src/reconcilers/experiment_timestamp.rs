//! Keeps `experiment.date_updated` at or after its newest run update.
//!
//! Run writes enqueue the owning experiment id. Each cycle rewrites the
//! drained experiments' `date_updated` to the newest run timestamp and bumps
//! `version_number` once, in one batched statement.

use metatrack_db_memory::InMemoryStore;
use metatrack_storage::{DynStore, Statement};

use super::timestamp::{Hierarchy, ParentTimestampJob};

pub const JOB_NAME: &str = "update_experiment_timestamp";

pub const FIND_STALE_EXPERIMENTS: Statement = Statement::new(
    "find_stale_experiments",
    "SELECT e.id AS id \
     FROM experiment e \
     INNER JOIN experiment_run r ON r.experiment_id = e.id \
     GROUP BY e.id, e.date_updated \
     HAVING MAX(r.date_updated) > e.date_updated",
);

/// Guarded by `date_updated < newest run`, so reapplying it changes nothing.
pub const UPDATE_EXPERIMENT_TIMESTAMP: Statement = Statement::new(
    "update_experiment_timestamp",
    "UPDATE experiment AS e \
     SET date_updated = runs.max_date, version_number = e.version_number + 1 \
     FROM (SELECT MAX(date_updated) AS max_date FROM experiment_run WHERE experiment_id = $1) AS runs \
     WHERE e.id = $1 AND runs.max_date IS NOT NULL AND e.date_updated < runs.max_date",
);

pub const HIERARCHY: Hierarchy = Hierarchy {
    job_name: JOB_NAME,
    parent_table: "experiment",
    child_table: "experiment_run",
    parent_column: "experiment_id",
    find_stale: FIND_STALE_EXPERIMENTS,
    update_parent: UPDATE_EXPERIMENT_TIMESTAMP,
};

pub type UpdateExperimentTimestamp = ParentTimestampJob;

pub fn job(store: DynStore) -> UpdateExperimentTimestamp {
    ParentTimestampJob::new(HIERARCHY, store)
}

pub fn register_in_memory(store: InMemoryStore) -> InMemoryStore {
    HIERARCHY.register_in_memory(store)
}
