use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
/// Output format of the process logger.
pub enum LoggerConfigFormat {
  /// Minimal, single-line records. Suited to production terminals where log volume matters.
  #[serde(rename = "compact")]
  #[schemars(title = "compact")]
  Compact,
  /// Multi-line, human-friendly records with fields and source locations spelled out.
  ///
  /// Slower and noisier than `compact`, meant for local development.
  #[serde(rename = "pretty")]
  #[schemars(title = "pretty")]
  Pretty,
  /// One JSON object per record, for log aggregators.
  #[serde(rename = "json")]
  #[schemars(title = "json")]
  Json,
}

impl Default for LoggerConfigFormat {
  #[cfg(debug_assertions)]
  fn default() -> Self {
    LoggerConfigFormat::Pretty
  }

  #[cfg(not(debug_assertions))]
  fn default() -> Self {
    if atty::is(atty::Stream::Stdout) {
      LoggerConfigFormat::Compact
    } else {
      LoggerConfigFormat::Json
    }
  }
}
