//! Keeps `project.date_updated` at or after its newest experiment update.
//!
//! Experiment writes enqueue the owning project id. Reconciling an
//! experiment also moves its `date_updated`, which can leave the project
//! stale again; the resync scan picks those projects up.

use metatrack_db_memory::InMemoryStore;
use metatrack_storage::{DynStore, Statement};

use super::timestamp::{Hierarchy, ParentTimestampJob};

pub const JOB_NAME: &str = "update_project_timestamp";

pub const FIND_STALE_PROJECTS: Statement = Statement::new(
    "find_stale_projects",
    "SELECT p.id AS id \
     FROM project p \
     INNER JOIN experiment e ON e.project_id = p.id \
     GROUP BY p.id, p.date_updated \
     HAVING MAX(e.date_updated) > p.date_updated",
);

pub const UPDATE_PROJECT_TIMESTAMP: Statement = Statement::new(
    "update_project_timestamp",
    "UPDATE project AS p \
     SET date_updated = exps.max_date, version_number = p.version_number + 1 \
     FROM (SELECT MAX(date_updated) AS max_date FROM experiment WHERE project_id = $1) AS exps \
     WHERE p.id = $1 AND exps.max_date IS NOT NULL AND p.date_updated < exps.max_date",
);

pub const HIERARCHY: Hierarchy = Hierarchy {
    job_name: JOB_NAME,
    parent_table: "project",
    child_table: "experiment",
    parent_column: "project_id",
    find_stale: FIND_STALE_PROJECTS,
    update_parent: UPDATE_PROJECT_TIMESTAMP,
};

pub type UpdateProjectTimestamp = ParentTimestampJob;

pub fn job(store: DynStore) -> UpdateProjectTimestamp {
    ParentTimestampJob::new(HIERARCHY, store)
}

pub fn register_in_memory(store: InMemoryStore) -> InMemoryStore {
    HIERARCHY.register_in_memory(store)
}
