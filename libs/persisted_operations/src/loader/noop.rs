use crate::operation::PersistedOperationsTable;

use super::{LoadFailure, PersistedOperationsLoader};

#[derive(Debug, Default)]
pub struct NoopLoader;

#[async_trait::async_trait]
impl PersistedOperationsLoader for NoopLoader {
  async fn load(&self) -> Result<PersistedOperationsTable, LoadFailure> {
    Ok(PersistedOperationsTable::new())
  }
}
