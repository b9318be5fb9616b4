mod config;
mod outcome;
pub mod rules;
mod validator;

pub use config::{RuleConfig, ValidationConfig};
pub use outcome::{RuleCounters, ValidationError, ValidationOutcome};
pub use validator::{OperationCheckError, Validator, BASELINE_RULE_NAME};

#[derive(Debug, thiserror::Error)]
pub enum RuleConfigError {
  #[error("rule {rule} is enabled with max {max}, which is never satisfied")]
  UnsatisfiableLimit { rule: &'static str, max: usize },
}
