pub mod interpolate;

use interpolate::interpolate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shield_logger::config::LoggerConfigFormat;
use std::{
  fs::read_to_string,
  path::{Path, PathBuf},
  time::Duration,
};

pub use shield_persisted_operations::{
  FailureStrategy, PersistedOperationsConfig, PersistedOperationsLoaderConfig,
  PersistedOperationsReloadConfig, RemoteObjectStoreConfig,
};
pub use shield_validation::{RuleConfig, ValidationConfig};

/// Top-level configuration of the shield proxy.
///
/// Both YAML (`.yaml`, `.yml`) and JSON (`.json`) files are supported. The file
/// path is the first argument of the binary and defaults to `./config.yaml`.
///
/// ### Configuration Interpolation with Environment Variables
///
/// Environment variables are expanded before the file is parsed:
/// - `$VAR` and `${VAR}` insert the value of `VAR`, or an empty string (with a
///   warning) when it is not set.
/// - `${VAR:-default}` uses `default` when `VAR` is unset or empty,
///   `${VAR-default}` only when it is unset.
/// - `${VAR:?message}` and `${VAR?message}` fail the load when `VAR` is missing.
/// - `$$` is a literal `$`.
///
/// Relative paths in the file are resolved against the directory holding it.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ShieldConfig {
  /// Configuration for the HTTP server.
  #[serde(default)]
  pub server: ServerConfig,
  /// Process logger configuration.
  #[serde(default)]
  pub logger: LoggerConfig,
  /// The protected GraphQL server.
  pub upstream: UpstreamConfig,
  /// Schema used for the standard GraphQL validation. Without it, only the structural limits apply.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<SchemaConfig>,
  /// HTTP level protections of the GraphQL path.
  #[serde(default)]
  pub web: WebConfig,
  /// Persisted operations (trusted documents) resolution.
  #[serde(default)]
  pub persisted_operations: PersistedOperationsConfig,
  /// Structural limits applied to every operation.
  #[serde(default)]
  pub validation: ValidationConfig,
  /// Post-processing of upstream responses.
  #[serde(default)]
  pub response: ResponseConfig,
  #[serde(default)]
  pub access_logging: AccessLoggingConfig,
  /// Directory of the loaded file. Not part of the file itself.
  #[serde(skip)]
  pub base_path: PathBuf,
}

impl ShieldConfig {
  pub fn resolve_path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_path.join(path)
    }
  }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
  /// The host to listen on, default to 127.0.0.1
  #[serde(default = "default_server_host")]
  pub host: String,
  /// The port to listen on, default to 8080
  #[serde(default = "default_server_port")]
  pub port: u16,
  /// The path protected by the pipeline.
  #[serde(default = "default_graphql_path")]
  pub graphql_path: String,
  /// How long in-flight requests are given to complete on shutdown.
  #[serde(
    deserialize_with = "humantime_serde::deserialize",
    serialize_with = "humantime_serde::serialize",
    default = "default_shutdown_timeout"
  )]
  #[schemars(with = "String")]
  pub shutdown_timeout: Duration,
  /// Exposes `GET /debug/persisted-operations` and `POST /debug/persisted-operations/reload`.
  #[serde(default)]
  pub debug_endpoint: bool,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: default_server_host(),
      port: default_server_port(),
      graphql_path: default_graphql_path(),
      shutdown_timeout: default_shutdown_timeout(),
      debug_endpoint: false,
    }
  }
}

fn default_server_port() -> u16 {
  8080
}

fn default_server_host() -> String {
  "127.0.0.1".to_string()
}

fn default_graphql_path() -> String {
  "/graphql".to_string()
}

fn default_shutdown_timeout() -> Duration {
  Duration::from_secs(20)
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LoggerConfig {
  /// Environment filter configuration as a string.
  ///
  /// - `info` (logs all messages at info level and higher across all modules)
  ///
  /// - `shield_engine=debug,info` (debug messages for the engine, info for everything else)
  ///
  /// - `access_log=off,info` (silences the access log)
  ///
  /// See [tracing_subscriber::EnvFilter](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html) for more information.
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// - `pretty` format is human-readable, ideal for development and debugging.
  ///
  /// - `json` format is structured, suitable for production environments and log analysis tools.
  ///
  /// By default, `pretty` is used in debug builds. Release builds use `compact` in TTY
  /// environments and `json` otherwise.
  #[serde(default)]
  pub format: LoggerConfigFormat,
  /// Prints the timings of the pipeline stages as span close events.
  #[serde(default)]
  pub print_performance_info: bool,
}

impl Default for LoggerConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      format: LoggerConfigFormat::default(),
      print_performance_info: false,
    }
  }
}

fn default_log_filter() -> String {
  "info".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct UpstreamConfig {
  /// URL of the protected GraphQL endpoint.
  pub endpoint: String,
  /// Bound on every upstream call.
  #[serde(
    deserialize_with = "humantime_serde::deserialize",
    serialize_with = "humantime_serde::serialize",
    default = "default_upstream_timeout"
  )]
  #[schemars(with = "String")]
  pub timeout: Duration,
}

fn default_upstream_timeout() -> Duration {
  Duration::from_secs(10)
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SchemaConfig {
  /// SDL file of the upstream schema.
  pub path: PathBuf,
  /// When set, the file is read again on this interval. A failed read keeps the previous schema.
  #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
  #[schemars(with = "Option<String>")]
  pub reload_interval: Option<Duration>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct WebConfig {
  /// Rejects non-POST requests that carry GraphQL parameters with `405 Method Not Allowed`.
  #[serde(default)]
  pub post_only: bool,
  /// Largest accepted request body, in bytes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_body_bytes: Option<usize>,
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ResponseConfig {
  /// Replaces every upstream error with a single generic one.
  #[serde(default = "default_true")]
  pub obfuscate_upstream_errors: bool,
  #[serde(default)]
  pub block_field_suggestions: BlockFieldSuggestionsConfig,
}

impl Default for ResponseConfig {
  fn default() -> Self {
    Self {
      obfuscate_upstream_errors: true,
      block_field_suggestions: BlockFieldSuggestionsConfig::default(),
    }
  }
}

/// Masks the `Did you mean ...` hints of upstream error messages, which leak schema details.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct BlockFieldSuggestionsConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_suggestion_mask")]
  pub mask: String,
}

impl Default for BlockFieldSuggestionsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      mask: default_suggestion_mask(),
    }
  }
}

fn default_suggestion_mask() -> String {
  "[redacted]".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct AccessLoggingConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Request headers whose values are included in the record.
  #[serde(default)]
  pub include_headers: Vec<String>,
  #[serde(default = "default_true")]
  pub include_operation_name: bool,
  /// Includes the decoded request payload in the record.
  #[serde(default)]
  pub include_payload: bool,
}

impl Default for AccessLoggingConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      include_headers: vec![],
      include_operation_name: true,
      include_payload: false,
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path:?}: {source}")]
  ReadFile {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("unsupported config file extension: {0:?}")]
  UnsupportedExtension(PathBuf),
  #[error("failed to interpolate config file: {}", .0.join(", "))]
  Interpolation(Vec<String>),
  #[error("failed to parse JSON config file: {0}")]
  Json(#[from] serde_json::Error),
  #[error("failed to parse YAML config file: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("invalid value for {field}: {reason}")]
  InvalidValue { field: &'static str, reason: String },
}

#[tracing::instrument(level = "trace", skip(get_env_value))]
pub fn load_config(
  file_path: &Path,
  get_env_value: impl Fn(&str) -> Option<String>,
) -> Result<ShieldConfig, ConfigError> {
  let format = ConfigFormat::from_path(file_path)?;
  let raw_contents = read_to_string(file_path).map_err(|source| ConfigError::ReadFile {
    path: file_path.to_path_buf(),
    source,
  })?;

  let mut config = parse_config_contents(raw_contents, format, get_env_value)?;
  config.base_path = file_path
    .parent()
    .unwrap_or_else(|| Path::new(""))
    .to_path_buf();

  Ok(config)
}

pub fn parse_config_contents(
  contents: String,
  format: ConfigFormat,
  get_env_value: impl Fn(&str) -> Option<String>,
) -> Result<ShieldConfig, ConfigError> {
  let (config_string, warnings) =
    interpolate(&contents, get_env_value).map_err(ConfigError::Interpolation)?;

  for warning in warnings {
    tracing::warn!("{}", warning);
  }

  let config = match format {
    ConfigFormat::Json => parse_config_from_json(&config_string)?,
    ConfigFormat::Yaml => parse_config_from_yaml(&config_string)?,
  };

  check_config(&config)?;

  Ok(config)
}

fn check_config(config: &ShieldConfig) -> Result<(), ConfigError> {
  let schema_interval = config.schema.as_ref().and_then(|s| s.reload_interval);

  if schema_interval == Some(Duration::ZERO) {
    return Err(ConfigError::InvalidValue {
      field: "schema.reload_interval",
      reason: "must be greater than zero".to_string(),
    });
  }

  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
  Json,
  Yaml,
}

impl ConfigFormat {
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
      Some("json") => Ok(ConfigFormat::Json),
      Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
      _ => Err(ConfigError::UnsupportedExtension(path.to_path_buf())),
    }
  }
}

fn parse_config_from_yaml(contents: &str) -> Result<ShieldConfig, serde_yaml::Error> {
  serde_yaml::from_str::<ShieldConfig>(contents)
}

fn parse_config_from_json(contents: &str) -> Result<ShieldConfig, serde_json::Error> {
  serde_json::from_str::<ShieldConfig>(contents)
}
