pub mod config;
pub mod observability;
pub mod reconcilers;
pub mod server;
pub mod shutdown;
pub mod write_path;

pub use config::{AppConfig, ConfigError, ReconcilersConfig, StorageBackend, StorageConfig};
pub use observability::init_tracing;
pub use reconcilers::ReconcilerSet;
pub use server::{MetatrackServer, ServerBuilder, connect_storage, memory_store};
pub use shutdown::{GracefulShutdown, ShutdownOutcome, shutdown_signal};
pub use write_path::RunWriter;
