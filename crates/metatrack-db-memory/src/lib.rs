//! In-memory storage backend for metatrack.
//!
//! This crate provides an in-memory implementation of the `StoreExecutor`
//! facade from `metatrack-storage`. Statements are not parsed; each statement
//! name is bound to a handler that emulates it over plain row tables.
//!
//! # Example
//!
//! ```ignore
//! use metatrack_db_memory::InMemoryStore;
//! use metatrack_storage::{Row, Statement};
//!
//! const IDS: Statement = Statement::new("ids", "SELECT id FROM experiment");
//!
//! let store = InMemoryStore::new().with_query(IDS.name, |tables| {
//!     tables.rows("experiment").map(|(pk, _)| Row::new().with("id", pk)).collect()
//! });
//! ```

mod storage;
mod tables;

pub use metatrack_storage::{StorageError, StoreExecutor};
pub use storage::{InMemoryStore, QueryHandler, UpdateHandler};
pub use tables::Tables;
