use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::operation::{PersistedOperation, PersistedOperationsTable};

use super::{LoadFailure, LoaderError, PersistedOperationsLoader};

pub const MANIFEST_EXTENSION: &str = "json";

/// Reads every `*.json` manifest directly inside `path`. Sub-directories are ignored.
#[derive(Debug, Clone)]
pub struct LocalDirectoryLoader {
  path: PathBuf,
}

impl LocalDirectoryLoader {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  async fn manifest_paths(&self) -> Result<Vec<PathBuf>, LoaderError> {
    let mut entries =
      tokio::fs::read_dir(&self.path)
        .await
        .map_err(|source| LoaderError::ReadDirectory {
          path: self.path.clone(),
          source,
        })?;

    let mut paths = vec![];

    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|source| LoaderError::ReadDirectory {
        path: self.path.clone(),
        source,
      })?
    {
      let path = entry.path();
      let is_file = entry
        .file_type()
        .await
        .map(|t| t.is_file())
        .unwrap_or(false);

      if is_file && path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION) {
        paths.push(path);
      }
    }

    // later manifests win on duplicated hashes, so keep the order stable
    paths.sort();

    Ok(paths)
  }

  async fn read_manifest(path: &Path) -> Result<HashMap<String, String>, LoaderError> {
    let contents = tokio::fs::read(path)
      .await
      .map_err(|source| LoaderError::ReadManifest {
        path: path.to_path_buf(),
        source,
      })?;

    serde_json::from_slice::<HashMap<String, String>>(&contents).map_err(|source| {
      LoaderError::InvalidManifest {
        path: path.to_path_buf(),
        source,
      }
    })
  }
}

#[async_trait::async_trait]
impl PersistedOperationsLoader for LocalDirectoryLoader {
  async fn load(&self) -> Result<PersistedOperationsTable, LoadFailure> {
    debug!("loading persisted operations from directory {:?}", self.path);

    let paths = self.manifest_paths().await.map_err(LoadFailure::new)?;
    let mut table = PersistedOperationsTable::new();
    let mut errors = vec![];

    for path in paths {
      match Self::read_manifest(&path).await {
        Ok(manifest) => {
          debug!("manifest {:?} holds {} operations", path, manifest.len());

          for (hash, text) in manifest {
            table.insert(hash, PersistedOperation::new(text));
          }
        }
        Err(e) => {
          warn!("skipping manifest: {}", e);
          errors.push(e);
        }
      }
    }

    if !errors.is_empty() {
      return Err(LoadFailure {
        partial: table,
        errors,
      });
    }

    info!(
      "loaded persisted operations from directory {:?}, total records: {}",
      self.path,
      table.len()
    );

    Ok(table)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
  }

  #[tokio::test]
  async fn loads_json_manifests_only() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "a.json",
      &json!({"h1": "query Foo { a }", "h2": "{ b }"}).to_string(),
    );
    write(
      dir.path(),
      "b.json",
      &json!({"h3": "mutation Bar { c }"}).to_string(),
    );
    write(dir.path(), "notes.txt", "not a manifest");
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    write(
      &dir.path().join("nested"),
      "c.json",
      &json!({"h4": "{ d }"}).to_string(),
    );

    let table = LocalDirectoryLoader::new(dir.path()).load().await.unwrap();

    assert_eq!(table.len(), 3);
    assert_eq!(table["h1"].operation_name.as_deref(), Some("Foo"));
    assert_eq!(table["h2"].operation_name, None);
    assert_eq!(table["h3"].operation_name.as_deref(), Some("Bar"));
    assert!(!table.contains_key("h4"));
  }

  #[tokio::test]
  async fn empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let table = LocalDirectoryLoader::new(dir.path()).load().await.unwrap();

    assert!(table.is_empty());
  }

  #[tokio::test]
  async fn invalid_manifest_reports_partial_table() {
    let dir = tempfile::tempdir().unwrap();
    write(
      dir.path(),
      "good.json",
      &json!({"h1": "{ a }"}).to_string(),
    );
    write(dir.path(), "bad.json", "{");

    let failure = LocalDirectoryLoader::new(dir.path())
      .load()
      .await
      .unwrap_err();

    assert_eq!(failure.errors.len(), 1);
    assert!(matches!(
      failure.errors[0],
      LoaderError::InvalidManifest { .. }
    ));
    assert_eq!(failure.partial.len(), 1);
    assert!(failure.partial.contains_key("h1"));
  }

  #[tokio::test]
  async fn missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let failure = LocalDirectoryLoader::new(dir.path().join("missing"))
      .load()
      .await
      .unwrap_err();

    assert!(failure.partial.is_empty());
    assert!(matches!(
      failure.errors[0],
      LoaderError::ReadDirectory { .. }
    ));
  }
}
