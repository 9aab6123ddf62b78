//! # metatrack-storage
//!
//! Storage execution facade for metatrack.
//!
//! This crate defines the traits and types every storage backend implements.
//! It does not contain any implementations; those live in
//! `metatrack-db-memory` and `metatrack-db-postgres`.
//!
//! The facade is deliberately small:
//! - [`StoreExecutor::stream`] runs a read-only statement and yields rows
//!   lazily under a caller-supplied fetch size
//! - [`StoreExecutor::execute_batch`] runs a parameterized statement once per
//!   binding set, as one unit

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{RowStream, StoreExecutor};
pub use types::{Bindings, Row, Statement, Value};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store.
pub type DynStore = std::sync::Arc<dyn StoreExecutor>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use metatrack_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{RowStream, StoreExecutor};
    pub use crate::types::{Bindings, Row, Statement, Value};
    pub use crate::{DynStore, StorageResult};
}
