use shield_common::lexer::{count_tokens, LexerError};

use crate::{
  config::RuleConfig,
  outcome::{RuleCounters, ValidationError, ValidationOutcome},
};

pub const RULE_NAME: &str = "max_tokens";

/// Works on the raw operation text, before anything is parsed.
#[derive(Debug)]
pub struct MaxTokensRule {
  config: RuleConfig,
  counters: RuleCounters,
}

impl MaxTokensRule {
  pub fn new(config: RuleConfig) -> Self {
    Self {
      config,
      counters: RuleCounters::default(),
    }
  }

  pub fn counters(&self) -> &RuleCounters {
    &self.counters
  }

  /// A lexer failure is returned as `Err`, separately from limit violations.
  pub fn check(
    &self,
    operation_text: &str,
    operation_name: Option<&str>,
  ) -> Result<Option<ValidationError>, LexerError> {
    if !self.config.enabled {
      return Ok(None);
    }

    let found = count_tokens(operation_text)?;

    if found <= self.config.max {
      self.counters.record(ValidationOutcome::Allowed);
      return Ok(None);
    }

    let outcome = ValidationOutcome::for_violation(self.config.reject_on_failure);
    self.counters.record(outcome);

    Ok(Some(ValidationError::new(
      RULE_NAME,
      operation_name,
      format!(
        "operation has exceeded maximum tokens. found [{}], max [{}]",
        found, self.config.max
      ),
      outcome,
    )))
  }
}
