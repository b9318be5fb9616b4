use tracing::warn;

use crate::{
  config::RuleConfig,
  outcome::{RuleCounters, ValidationError, ValidationOutcome},
  RuleConfigError,
};

pub const RULE_NAME: &str = "max_batch";

#[derive(Debug)]
pub struct MaxBatchRule {
  config: RuleConfig,
  counters: RuleCounters,
}

impl MaxBatchRule {
  /// Fails when the rule is enabled with a limit no batch can ever satisfy.
  pub fn try_new(config: RuleConfig) -> Result<Self, RuleConfigError> {
    if config.enabled && config.max < 1 {
      return Err(RuleConfigError::UnsatisfiableLimit {
        rule: RULE_NAME,
        max: config.max,
      });
    }

    Ok(Self {
      config,
      counters: RuleCounters::default(),
    })
  }

  /// Like `try_new`, but an unsatisfiable limit disables the rule instead.
  pub fn new(config: RuleConfig) -> Self {
    Self::try_new(config).unwrap_or_else(|e| {
      warn!("{}, the rule is disabled", e);

      Self {
        config: RuleConfig {
          enabled: false,
          ..config
        },
        counters: RuleCounters::default(),
      }
    })
  }

  pub fn counters(&self) -> &RuleCounters {
    &self.counters
  }

  pub fn check(&self, batch_size: usize) -> Option<ValidationError> {
    if !self.config.enabled {
      return None;
    }

    if batch_size <= self.config.max {
      self.counters.record(ValidationOutcome::Allowed);
      return None;
    }

    let outcome = ValidationOutcome::for_violation(self.config.reject_on_failure);
    self.counters.record(outcome);

    Some(ValidationError::new(
      RULE_NAME,
      None,
      format!(
        "operation has exceeded maximum batch size. found [{}], max [{}]",
        batch_size, self.config.max
      ),
      outcome,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batch_at_limit_passes() {
    let rule = MaxBatchRule::new(RuleConfig::new(3));

    assert!(rule.check(1).is_none());
    assert!(rule.check(3).is_none());
    assert_eq!(rule.counters().allowed(), 2);
  }

  #[test]
  fn batch_over_limit_cites_both_numbers() {
    let rule = MaxBatchRule::new(RuleConfig::new(3));
    let error = rule.check(4).unwrap();

    assert!(error.is_rejected());
    assert_eq!(
      error.message,
      "operation has exceeded maximum batch size. found [4], max [3]"
    );
  }

  #[test]
  fn zero_limit_disables_rule() {
    assert!(matches!(
      MaxBatchRule::try_new(RuleConfig::new(0)),
      Err(RuleConfigError::UnsatisfiableLimit { max: 0, .. })
    ));

    let rule = MaxBatchRule::new(RuleConfig::new(0));
    assert!(rule.check(100).is_none());
  }
}
