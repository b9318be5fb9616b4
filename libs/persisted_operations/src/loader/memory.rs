use std::sync::Mutex;

use crate::operation::{PersistedOperation, PersistedOperationsTable};

use super::{LoadFailure, LoaderError, PersistedOperationsLoader};

/// Serves a table kept in memory. The next result can be swapped at any time,
/// including for a failure.
#[derive(Debug)]
pub struct MemoryLoader {
  next: Mutex<Result<PersistedOperationsTable, String>>,
}

impl MemoryLoader {
  pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      next: Mutex::new(Ok(Self::table_from(entries))),
    }
  }

  pub fn table_from<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> PersistedOperationsTable
  where
    K: Into<String>,
    V: Into<String>,
  {
    entries
      .into_iter()
      .map(|(hash, text)| (hash.into(), PersistedOperation::new(text)))
      .collect()
  }

  pub fn set_table(&self, table: PersistedOperationsTable) {
    if let Ok(mut next) = self.next.lock() {
      *next = Ok(table);
    }
  }

  pub fn set_failure(&self, message: impl Into<String>) {
    if let Ok(mut next) = self.next.lock() {
      *next = Err(message.into());
    }
  }
}

#[async_trait::async_trait]
impl PersistedOperationsLoader for MemoryLoader {
  async fn load(&self) -> Result<PersistedOperationsTable, LoadFailure> {
    let next = self
      .next
      .lock()
      .map_err(|_| LoadFailure::new(LoaderError::Custom("memory loader poisoned".into())))?;

    match &*next {
      Ok(table) => Ok(table.clone()),
      Err(message) => Err(LoadFailure::new(LoaderError::Custom(message.clone()))),
    }
  }
}
