use std::{path::PathBuf, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct PersistedOperationsConfig {
  /// Enables resolution of persisted operation hashes.
  #[serde(default)]
  pub enabled: bool,
  /// When set, every operation must be resolved through the store: literal queries are
  /// not allowed to pass through, and unknown hashes are rejected.
  #[serde(default)]
  pub reject_on_failure: bool,
  /// The source of the persisted operations manifests.
  #[serde(default)]
  pub loader: PersistedOperationsLoaderConfig,
  /// Background refresh of the store.
  #[serde(default)]
  pub reload: PersistedOperationsReloadConfig,
}

impl Default for PersistedOperationsConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      reject_on_failure: false,
      loader: PersistedOperationsLoaderConfig::default(),
      reload: PersistedOperationsReloadConfig::default(),
    }
  }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, Default)]
#[serde(tag = "type")]
pub enum PersistedOperationsLoaderConfig {
  /// Loads every `*.json` manifest in a local directory (non-recursive).
  /// Each manifest is a JSON object mapping a hash to the raw operation text.
  ///
  /// Example:
  /// `{"3f2a...": "query Product { product(id: 1) { id } }"}`
  #[serde(rename = "local")]
  #[schemars(title = "local")]
  Local {
    /// Directory holding the manifests. Relative paths are resolved against the configuration file.
    path: PathBuf,
  },
  /// Downloads `*.json` manifests from an object storage bucket into `local_path`,
  /// then loads them the same way the `local` loader does.
  #[serde(rename = "remote")]
  #[schemars(title = "remote")]
  Remote(RemoteObjectStoreConfig),
  /// Keeps the store empty.
  #[serde(rename = "none")]
  #[schemars(title = "none")]
  #[default]
  Noop,
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct RemoteObjectStoreConfig {
  /// Base URL of the object storage JSON API.
  #[serde(default = "default_object_store_base_url")]
  pub base_url: String,
  /// Name of the bucket holding the manifests.
  pub bucket: String,
  /// Only objects directly under this prefix are downloaded.
  #[serde(default)]
  pub prefix: String,
  /// Staging directory the manifests are written to.
  pub local_path: PathBuf,
  /// Optional bearer token sent with every remote call.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bearer_token: Option<String>,
  /// Timeout applied to every remote call.
  #[serde(
    deserialize_with = "humantime_serde::deserialize",
    serialize_with = "humantime_serde::serialize",
    default = "default_remote_timeout"
  )]
  #[schemars(with = "String")]
  pub timeout: Duration,
}

fn default_object_store_base_url() -> String {
  "https://storage.googleapis.com".to_string()
}

fn default_remote_timeout() -> Duration {
  Duration::from_secs(10)
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct PersistedOperationsReloadConfig {
  #[serde(default)]
  pub enabled: bool,
  /// How often the store is refreshed. Must be at least 10 seconds.
  #[serde(
    deserialize_with = "humantime_serde::deserialize",
    serialize_with = "humantime_serde::serialize",
    default = "default_reload_interval"
  )]
  #[schemars(with = "String")]
  pub interval: Duration,
  /// What happens to the current table when a refresh fails.
  #[serde(default)]
  pub failure_strategy: FailureStrategy,
}

impl Default for PersistedOperationsReloadConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      interval: default_reload_interval(),
      failure_strategy: FailureStrategy::default(),
    }
  }
}

fn default_reload_interval() -> Duration {
  Duration::from_secs(5 * 60)
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq, Default)]
pub enum FailureStrategy {
  /// A failed refresh leaves the current table untouched.
  #[serde(rename = "reject")]
  #[schemars(title = "reject")]
  #[default]
  Reject,
  /// Whatever the loader managed to read replaces the current table, even when it is empty.
  ///
  /// A transient failure of the source can therefore erase every persisted operation.
  #[serde(rename = "ignore")]
  #[schemars(title = "ignore")]
  Ignore,
}
