use std::{
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
  },
  time::Duration,
};

use tokio::{
  sync::{oneshot, Mutex},
  task::JoinHandle,
  time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
  config::{
    FailureStrategy, PersistedOperationsConfig, PersistedOperationsLoaderConfig,
    PersistedOperationsReloadConfig,
  },
  loader::{
    LoadFailure, LoaderError, LocalDirectoryLoader, NoopLoader, PersistedOperationsLoader,
    RemoteManifestSource, RemoteObjectStoreLoader,
  },
  operation::{PersistedOperation, PersistedOperationsTable},
};

pub const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum PersistedOperationsStoreError {
  #[error("persisted operations reload interval {interval:?} is below the minimum of {min:?}")]
  ReloadIntervalTooShort { interval: Duration, min: Duration },
  #[error("failed to create persisted operations loader: {0}")]
  Loader(#[from] LoaderError),
  #[error("persisted operations reload failed: {0}")]
  Reload(LoadFailure),
  #[error("a persisted operations reload is already in progress")]
  ReloadInProgress,
}

/// Hash to operation lookups over a table that is replaced as a whole on every reload.
///
/// Readers clone the current `Arc` and keep using it for as long as they need,
/// so a swap never blocks longer than the pointer write.
#[derive(Debug)]
pub struct PersistedOperationsStore {
  table: RwLock<Arc<PersistedOperationsTable>>,
  loader: Arc<dyn PersistedOperationsLoader>,
  remote: Option<Arc<dyn RemoteManifestSource>>,
  reload_config: PersistedOperationsReloadConfig,
  reload_lock: Mutex<()>,
  reload_successes: AtomicU64,
  reload_failures: AtomicU64,
}

impl PersistedOperationsStore {
  pub fn new(
    loader: Arc<dyn PersistedOperationsLoader>,
    remote: Option<Arc<dyn RemoteManifestSource>>,
    reload_config: PersistedOperationsReloadConfig,
  ) -> Result<Self, PersistedOperationsStoreError> {
    if reload_config.enabled && reload_config.interval < MIN_RELOAD_INTERVAL {
      return Err(PersistedOperationsStoreError::ReloadIntervalTooShort {
        interval: reload_config.interval,
        min: MIN_RELOAD_INTERVAL,
      });
    }

    Ok(Self {
      table: RwLock::new(Arc::new(PersistedOperationsTable::new())),
      loader,
      remote,
      reload_config,
      reload_lock: Mutex::new(()),
      reload_successes: AtomicU64::new(0),
      reload_failures: AtomicU64::new(0),
    })
  }

  /// Builds the loaders described by `config` and performs the initial load.
  ///
  /// Relative paths are resolved against `base_path`. A failed initial load is
  /// logged and leaves the store with whatever the failure strategy allows.
  pub async fn from_config(
    config: &PersistedOperationsConfig,
    base_path: &Path,
  ) -> Result<Arc<Self>, PersistedOperationsStoreError> {
    let (loader, remote): (
      Arc<dyn PersistedOperationsLoader>,
      Option<Arc<dyn RemoteManifestSource>>,
    ) = match &config.loader {
      PersistedOperationsLoaderConfig::Local { path } => (
        Arc::new(LocalDirectoryLoader::new(resolve_path(base_path, path))),
        None,
      ),
      PersistedOperationsLoaderConfig::Remote(remote_config) => {
        let mut remote_config = remote_config.clone();
        remote_config.local_path = resolve_path(base_path, &remote_config.local_path);
        let local = LocalDirectoryLoader::new(remote_config.local_path.clone());

        (
          Arc::new(local),
          Some(Arc::new(RemoteObjectStoreLoader::new(remote_config)?)),
        )
      }
      PersistedOperationsLoaderConfig::Noop => (Arc::new(NoopLoader), None),
    };

    let store = Arc::new(Self::new(loader, remote, config.reload.clone())?);

    if let Err(e) = store.reload(config.reload.failure_strategy).await {
      error!("initial load of persisted operations failed: {}", e);
    }

    Ok(store)
  }

  pub fn reload_config(&self) -> &PersistedOperationsReloadConfig {
    &self.reload_config
  }

  /// The current table. Hold on to it to get consistent lookups for a whole request.
  pub fn snapshot(&self) -> Arc<PersistedOperationsTable> {
    match self.table.read() {
      Ok(table) => table.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn resolve(&self, hash: &str) -> Option<PersistedOperation> {
    self.snapshot().get(hash).cloned()
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn reload_successes(&self) -> u64 {
    self.reload_successes.load(Ordering::Relaxed)
  }

  pub fn reload_failures(&self) -> u64 {
    self.reload_failures.load(Ordering::Relaxed)
  }

  /// Waits for any reload in progress, then reloads. Returns the size of the new table.
  pub async fn reload(
    &self,
    strategy: FailureStrategy,
  ) -> Result<usize, PersistedOperationsStoreError> {
    let _guard = self.reload_lock.lock().await;

    self.reload_exclusive(strategy).await
  }

  /// Same as `reload`, but gives up right away when another reload holds the lock.
  pub async fn try_reload(
    &self,
    strategy: FailureStrategy,
  ) -> Result<usize, PersistedOperationsStoreError> {
    let Ok(_guard) = self.reload_lock.try_lock() else {
      return Err(PersistedOperationsStoreError::ReloadInProgress);
    };

    self.reload_exclusive(strategy).await
  }

  async fn reload_exclusive(
    &self,
    strategy: FailureStrategy,
  ) -> Result<usize, PersistedOperationsStoreError> {
    let mut pull_error = None;

    if let Some(remote) = &self.remote {
      if let Err(e) = remote.pull().await {
        warn!("failed to pull remote persisted operations manifests: {}", e);

        if strategy == FailureStrategy::Reject {
          return Err(self.failed(LoadFailure::new(e)));
        }

        pull_error = Some(e);
      }
    }

    let loaded = match (self.loader.load().await, pull_error) {
      (Ok(table), None) => Ok(table),
      (Ok(table), Some(e)) => Err(LoadFailure {
        partial: table,
        errors: vec![e],
      }),
      (Err(mut failure), Some(e)) => {
        failure.errors.insert(0, e);
        Err(failure)
      }
      (Err(failure), None) => Err(failure),
    };

    match loaded {
      Ok(table) => {
        let size = table.len();
        self.swap(table);
        self.reload_successes.fetch_add(1, Ordering::Relaxed);
        info!("persisted operations reloaded, total records: {}", size);

        Ok(size)
      }
      Err(mut failure) => {
        match strategy {
          FailureStrategy::Reject => {
            warn!("persisted operations reload failed, keeping the previous table");
          }
          FailureStrategy::Ignore => {
            let partial = std::mem::take(&mut failure.partial);
            warn!(
              "persisted operations reload failed, replacing the table with {} loaded records",
              partial.len()
            );
            self.swap(partial);
          }
        }

        Err(self.failed(failure))
      }
    }
  }

  fn failed(&self, failure: LoadFailure) -> PersistedOperationsStoreError {
    self.reload_failures.fetch_add(1, Ordering::Relaxed);

    PersistedOperationsStoreError::Reload(failure)
  }

  fn swap(&self, table: PersistedOperationsTable) {
    match self.table.write() {
      Ok(mut current) => *current = Arc::new(table),
      Err(e) => error!("failed to acquire persisted operations table lock: {:?}", e),
    }
  }

  /// Starts the periodic refresh when it is enabled.
  ///
  /// Reloads run inside the loop, so ticks that fire during a slow reload are
  /// dropped rather than queued. Stopping the loop also abandons a reload that
  /// has not swapped the table yet.
  pub fn spawn_refresh(self: &Arc<Self>) -> Option<RefreshHandle> {
    if !self.reload_config.enabled {
      return None;
    }

    let period = self.reload_config.interval;
    let strategy = self.reload_config.failure_strategy;
    let store = Arc::clone(self);
    let (stop_sender, mut stop_receiver) = oneshot::channel::<()>();

    info!("persisted operations refresh scheduled every {:?}", period);

    let task = tokio::spawn(async move {
      let mut timer = interval_at(Instant::now() + period, period);
      timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          _ = &mut stop_receiver => break,
          _ = timer.tick() => {}
        }

        tokio::select! {
          _ = &mut stop_receiver => break,
          result = store.try_reload(strategy) => match result {
            Ok(_) => {}
            Err(PersistedOperationsStoreError::ReloadInProgress) => {
              debug!("another persisted operations reload is running, skipping tick");
            }
            Err(e) => error!("{}", e),
          },
        }
      }

      debug!("persisted operations refresh stopped");
    });

    Some(RefreshHandle::new(stop_sender, task))
  }
}

fn resolve_path(base_path: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    base_path.join(path)
  }
}

/// Owner of a running refresh loop. `shutdown` signals the loop and waits for it to exit.
#[derive(Debug)]
pub struct RefreshHandle {
  stop: Option<oneshot::Sender<()>>,
  task: JoinHandle<()>,
}

impl RefreshHandle {
  pub fn new(stop: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
    Self {
      stop: Some(stop),
      task,
    }
  }

  pub async fn shutdown(mut self) {
    if let Some(stop) = self.stop.take() {
      let _ = stop.send(());
    }

    if let Err(e) = (&mut self.task).await {
      error!("persisted operations refresh task failed: {:?}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loader::MemoryLoader;

  fn reload_config(enabled: bool, interval: Duration) -> PersistedOperationsReloadConfig {
    PersistedOperationsReloadConfig {
      enabled,
      interval,
      failure_strategy: FailureStrategy::Reject,
    }
  }

  fn store_with(loader: &Arc<MemoryLoader>) -> PersistedOperationsStore {
    PersistedOperationsStore::new(
      loader.clone(),
      None,
      reload_config(false, Duration::from_secs(60)),
    )
    .unwrap()
  }

  #[derive(Debug)]
  struct FailingRemote;

  #[async_trait::async_trait]
  impl RemoteManifestSource for FailingRemote {
    async fn pull(&self) -> Result<usize, LoaderError> {
      Err(LoaderError::Custom("bucket unavailable".into()))
    }
  }

  #[tokio::test]
  async fn successful_reload_replaces_whole_table() {
    let loader = Arc::new(MemoryLoader::new([("h1", "query A { a }"), ("h2", "{ b }")]));
    let store = store_with(&loader);

    assert!(store.is_empty());
    assert_eq!(store.reload(FailureStrategy::Reject).await.unwrap(), 2);
    assert_eq!(store.resolve("h1").unwrap().operation_name.as_deref(), Some("A"));

    loader.set_table(MemoryLoader::table_from([("h3", "{ c }")]));
    store.reload(FailureStrategy::Reject).await.unwrap();

    let table = store.snapshot();
    assert_eq!(table.len(), 1);
    assert!(table.contains_key("h3"));
    assert!(store.resolve("h1").is_none());
    assert_eq!(store.reload_successes(), 2);
  }

  #[tokio::test]
  async fn reject_strategy_keeps_previous_table() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = store_with(&loader);
    store.reload(FailureStrategy::Reject).await.unwrap();
    let before = store.snapshot();

    loader.set_failure("source unavailable");
    let error = store.reload(FailureStrategy::Reject).await.unwrap_err();

    assert!(matches!(error, PersistedOperationsStoreError::Reload(_)));
    assert_eq!(*store.snapshot(), *before);
    assert_eq!(store.reload_failures(), 1);
  }

  #[tokio::test]
  async fn ignore_strategy_swaps_in_partial_result() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = store_with(&loader);
    store.reload(FailureStrategy::Reject).await.unwrap();

    loader.set_failure("source unavailable");
    assert!(store.reload(FailureStrategy::Ignore).await.is_err());
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn failed_remote_pull_under_reject_skips_local_load() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = PersistedOperationsStore::new(
      loader.clone(),
      Some(Arc::new(FailingRemote)),
      reload_config(false, Duration::from_secs(60)),
    )
    .unwrap();

    assert!(store.reload(FailureStrategy::Reject).await.is_err());
    assert!(store.is_empty());

    // the local staging area is still loaded when failures are ignored
    assert!(store.reload(FailureStrategy::Ignore).await.is_err());
    assert!(store.resolve("h1").is_some());
    assert_eq!(store.reload_failures(), 2);
  }

  #[test]
  fn reload_interval_below_minimum() {
    let result = PersistedOperationsStore::new(
      Arc::new(NoopLoader),
      None,
      reload_config(true, Duration::from_secs(9)),
    );

    assert!(matches!(
      result,
      Err(PersistedOperationsStoreError::ReloadIntervalTooShort { .. })
    ));

    // a short interval is fine as long as the refresh is disabled
    assert!(PersistedOperationsStore::new(
      Arc::new(NoopLoader),
      None,
      reload_config(false, Duration::from_secs(1)),
    )
    .is_ok());
  }

  #[tokio::test]
  async fn try_reload_gives_up_while_another_runs() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = store_with(&loader);

    let _guard = store.reload_lock.lock().await;

    assert!(matches!(
      store.try_reload(FailureStrategy::Reject).await,
      Err(PersistedOperationsStoreError::ReloadInProgress)
    ));
    assert!(store.is_empty());
  }

  #[derive(Debug)]
  struct SlowLoader {
    delay: Duration,
    inner: MemoryLoader,
  }

  #[async_trait::async_trait]
  impl PersistedOperationsLoader for SlowLoader {
    async fn load(&self) -> Result<PersistedOperationsTable, LoadFailure> {
      tokio::time::sleep(self.delay).await;
      self.inner.load().await
    }
  }

  #[tokio::test]
  async fn snapshot_taken_before_reload_keeps_old_entries() {
    let loader = Arc::new(MemoryLoader::new([("h1", "query A { a }")]));
    let store = store_with(&loader);
    store.reload(FailureStrategy::Reject).await.unwrap();

    let before = store.snapshot();
    loader.set_table(MemoryLoader::table_from([("h2", "query B { b }")]));
    store.reload(FailureStrategy::Reject).await.unwrap();

    assert_eq!(before.len(), 1);
    assert!(before.contains_key("h1"));
    assert!(!before.contains_key("h2"));

    assert!(store.resolve("h1").is_none());
    assert_eq!(store.resolve("h2").unwrap().operation_name.as_deref(), Some("B"));
    assert!(!Arc::ptr_eq(&before, &store.snapshot()));
  }

  #[tokio::test(start_paused = true)]
  async fn shutdown_abandons_reload_in_flight() {
    let store = Arc::new(
      PersistedOperationsStore::new(
        Arc::new(SlowLoader {
          delay: Duration::from_secs(5),
          inner: MemoryLoader::new([("h1", "{ a }")]),
        }),
        None,
        reload_config(true, Duration::from_secs(10)),
      )
      .unwrap(),
    );

    let handle = store.spawn_refresh().unwrap();

    // the first tick fires at 10s, its load finishes at 15s
    tokio::time::sleep(Duration::from_secs(11)).await;
    handle.shutdown().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.is_empty());
    assert_eq!(store.reload_successes(), 0);
    assert_eq!(store.reload_failures(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn slow_reload_drops_ticks_instead_of_queueing() {
    let loader = SlowLoader {
      delay: Duration::from_secs(25),
      inner: MemoryLoader::new([("h1", "{ a }")]),
    };
    let store = Arc::new(
      PersistedOperationsStore::new(
        Arc::new(loader),
        None,
        reload_config(true, Duration::from_secs(10)),
      )
      .unwrap(),
    );

    let handle = store.spawn_refresh().unwrap();

    // one reload from 10s to 35s, the ticks at 20s and 30s are skipped
    tokio::time::sleep(Duration::from_secs(36)).await;
    assert_eq!(store.reload_successes(), 1);

    handle.shutdown().await;
  }

  #[tokio::test(start_paused = true)]
  async fn refresh_runs_on_interval_until_shutdown() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = Arc::new(
      PersistedOperationsStore::new(
        loader.clone(),
        None,
        reload_config(true, Duration::from_secs(10)),
      )
      .unwrap(),
    );

    let handle = store.spawn_refresh().unwrap();
    assert!(store.is_empty());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(store.resolve("h1").is_some());

    handle.shutdown().await;

    loader.set_table(MemoryLoader::table_from([("h2", "{ b }")]));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.resolve("h2").is_none());
    assert_eq!(store.reload_successes(), 1);
  }

  #[test]
  fn refresh_not_spawned_when_disabled() {
    let loader = Arc::new(MemoryLoader::new([("h1", "{ a }")]));
    let store = Arc::new(store_with(&loader));

    assert!(store.spawn_refresh().is_none());
  }

  #[tokio::test]
  async fn from_config_resolves_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("persisted")).unwrap();
    std::fs::write(
      dir.path().join("persisted").join("ops.json"),
      r#"{"h1": "query Product { product(id: 1) { id } }"}"#,
    )
    .unwrap();

    let config = PersistedOperationsConfig {
      enabled: true,
      reject_on_failure: false,
      loader: PersistedOperationsLoaderConfig::Local {
        path: PathBuf::from("persisted"),
      },
      reload: PersistedOperationsReloadConfig::default(),
    };

    let store = PersistedOperationsStore::from_config(&config, dir.path())
      .await
      .unwrap();

    assert_eq!(
      store.resolve("h1").unwrap().operation_name.as_deref(),
      Some("Product")
    );
  }
}
