mod config;
pub mod loader;
mod operation;
pub mod store;

pub use config::{
  FailureStrategy, PersistedOperationsConfig, PersistedOperationsLoaderConfig,
  PersistedOperationsReloadConfig, RemoteObjectStoreConfig,
};
pub use operation::{derive_operation_name, PersistedOperation, PersistedOperationsTable};
pub use store::{
  PersistedOperationsStore, PersistedOperationsStoreError, RefreshHandle, MIN_RELOAD_INTERVAL,
};

/// Resolution failure for an operation whose hash is not in the current table.
pub const PERSISTED_OPERATION_NOT_FOUND: &str = "PersistedOperationNotFound";
/// Resolution failure for an operation that carries no hash at all.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PersistedQueryNotFound";
