use std::{
  path::{Path, PathBuf},
  sync::{Arc, RwLock},
  time::Duration,
};

use shield_common::{
  graphql::{parse_graphql_schema, ParsedGraphQLSchema},
  SchemaParseError,
};
use shield_persisted_operations::RefreshHandle;
use tokio::{
  sync::oneshot,
  time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum SchemaProviderError {
  #[error("failed to read schema file {path:?}: {source}")]
  FailedToReadFile {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to parse schema: {source}")]
  FailedToParseSchema { source: SchemaParseError },
}

/// The schema used by baseline validation. Each request validates against the
/// snapshot current when its validation stage starts.
#[derive(Debug, Default)]
pub struct SchemaAwareness {
  schema: RwLock<Option<Arc<ParsedGraphQLSchema>>>,
  path: Option<PathBuf>,
}

impl SchemaAwareness {
  /// No schema at all: only the structural rules apply.
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn from_sdl(sdl: &str) -> Result<Self, SchemaProviderError> {
    let schema = parse_graphql_schema(sdl)
      .map_err(|source| SchemaProviderError::FailedToParseSchema { source })?;

    Ok(Self {
      schema: RwLock::new(Some(Arc::new(schema))),
      path: None,
    })
  }

  /// Reads and parses the file once. Any failure here is fatal for the caller.
  pub async fn from_file(path: &Path) -> Result<Self, SchemaProviderError> {
    info!("loading schema from {:?}", path);
    let schema = Self::load_schema(path).await?;

    Ok(Self {
      schema: RwLock::new(Some(Arc::new(schema))),
      path: Some(path.to_path_buf()),
    })
  }

  async fn load_schema(path: &Path) -> Result<ParsedGraphQLSchema, SchemaProviderError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|source| {
      SchemaProviderError::FailedToReadFile {
        path: path.to_path_buf(),
        source,
      }
    })?;

    parse_graphql_schema(&contents)
      .map_err(|source| SchemaProviderError::FailedToParseSchema { source })
  }

  pub fn schema(&self) -> Option<Arc<ParsedGraphQLSchema>> {
    match self.schema.read() {
      Ok(record) => record.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  fn replace(&self, schema: ParsedGraphQLSchema) {
    match self.schema.write() {
      Ok(mut record) => {
        record.replace(Arc::new(schema));
      }
      Err(e) => error!("failed to acquire schema lock, keeping previous schema: {:?}", e),
    }
  }

  /// Reads the file again. The previous schema is kept when this fails.
  pub async fn reload(&self) -> Result<(), SchemaProviderError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    let schema = Self::load_schema(path).await?;
    self.replace(schema);
    debug!("schema reloaded from {:?}", path);

    Ok(())
  }

  /// Re-reads the schema file on `interval`. `None` when the schema did not
  /// come from a file, or when `interval` is zero.
  pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> Option<RefreshHandle> {
    self.path.as_ref()?;

    if interval.is_zero() {
      warn!("schema reload interval must be greater than zero, periodic reload is disabled");
      return None;
    }

    let provider = Arc::clone(self);
    let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();

    info!("schema reload scheduled every {:?}", interval);

    let task = tokio::spawn(async move {
      let mut timer = interval_at(Instant::now() + interval, interval);
      timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          _ = &mut stop_receiver => {
            debug!("schema reload stopped");
            break;
          }
          _ = timer.tick() => {
            if let Err(e) = provider.reload().await {
              error!("failed to reload schema, keeping previous one: {}", e);
            }
          }
        }
      }
    });

    Some(RefreshHandle::new(stop_sender, task))
  }
}
