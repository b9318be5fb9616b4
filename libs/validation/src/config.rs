use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Limits of a single rule. Immutable once the validator is built.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub struct RuleConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Highest value that is still allowed.
  pub max: usize,
  /// When `false`, a violation is only recorded and the operation proceeds.
  #[serde(default = "default_true")]
  pub reject_on_failure: bool,
}

impl RuleConfig {
  pub fn new(max: usize) -> Self {
    Self {
      enabled: true,
      max,
      reject_on_failure: true,
    }
  }

  pub fn disabled() -> Self {
    Self {
      enabled: false,
      max: 0,
      reject_on_failure: false,
    }
  }

  pub fn observe_only(mut self) -> Self {
    self.reject_on_failure = false;
    self
  }
}

fn default_true() -> bool {
  true
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct ValidationConfig {
  /// Deepest allowed nesting of selections.
  #[serde(default = "default_max_depth")]
  pub max_depth: RuleConfig,
  /// Highest allowed number of aliased fields per operation, fragments included.
  #[serde(default = "default_max_aliases")]
  pub max_aliases: RuleConfig,
  /// Highest allowed number of lexical tokens in the operation text.
  #[serde(default = "default_max_tokens")]
  pub max_tokens: RuleConfig,
  /// Highest allowed number of operations in a batched request. A `max` below 1 disables the rule.
  #[serde(default = "default_max_batch")]
  pub max_batch: RuleConfig,
  /// Runs the standard GraphQL validation rules when a schema is available.
  #[serde(default = "default_true")]
  pub schema_validation: bool,
  /// Replaces every rejection message with a single generic one.
  #[serde(default)]
  pub hide_errors: bool,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self {
      max_depth: default_max_depth(),
      max_aliases: default_max_aliases(),
      max_tokens: default_max_tokens(),
      max_batch: default_max_batch(),
      schema_validation: true,
      hide_errors: false,
    }
  }
}

fn default_max_depth() -> RuleConfig {
  RuleConfig::new(15)
}

fn default_max_aliases() -> RuleConfig {
  RuleConfig::new(15)
}

fn default_max_tokens() -> RuleConfig {
  RuleConfig::new(1000)
}

fn default_max_batch() -> RuleConfig {
  RuleConfig::new(5)
}
