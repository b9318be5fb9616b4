use std::{fmt::Debug, path::PathBuf};

use crate::operation::PersistedOperationsTable;

pub mod local;
pub mod memory;
pub mod noop;
pub mod remote;

pub use local::LocalDirectoryLoader;
pub use memory::MemoryLoader;
pub use noop::NoopLoader;
pub use remote::RemoteObjectStoreLoader;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
  #[error("failed to read manifests directory {path:?}: {source}")]
  ReadDirectory {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to read manifest {path:?}: {source}")]
  ReadManifest {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("invalid manifest {path:?}: {source}")]
  InvalidManifest {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("failed to write manifest {path:?}: {source}")]
  WriteManifest {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("remote object store request failed: {0}")]
  Remote(#[from] reqwest::Error),
  #[error("remote object store responded with status {status} for {url}")]
  RemoteStatus {
    url: String,
    status: reqwest::StatusCode,
  },
  #[error("object listing of {url} did not finish after {pages} pages")]
  UnterminatedListing { url: String, pages: usize },
  #[error("{0}")]
  Custom(String),
}

/// A load that did not fully succeed. `partial` holds whatever could still be read.
#[derive(Debug)]
pub struct LoadFailure {
  pub partial: PersistedOperationsTable,
  pub errors: Vec<LoaderError>,
}

impl LoadFailure {
  pub fn new(error: LoaderError) -> Self {
    Self {
      partial: PersistedOperationsTable::new(),
      errors: vec![error],
    }
  }
}

impl std::fmt::Display for LoadFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let messages = self
      .errors
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join("; ");

    write!(f, "{}", messages)
  }
}

/// Produces a complete, fresh table of persisted operations.
#[async_trait::async_trait]
pub trait PersistedOperationsLoader: Send + Sync + Debug {
  async fn load(&self) -> Result<PersistedOperationsTable, LoadFailure>;
}

/// Stages manifests from a remote source into the directory a local loader reads from.
#[async_trait::async_trait]
pub trait RemoteManifestSource: Send + Sync + Debug {
  async fn pull(&self) -> Result<usize, LoaderError>;
}
