use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use shield_common::graphql::{GraphQLError, GraphQLErrorLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationOutcome {
  Allowed,
  /// Violation observed, not enforced.
  Failed,
  /// Violation enforced.
  Rejected,
}

impl ValidationOutcome {
  pub fn for_violation(reject_on_failure: bool) -> Self {
    if reject_on_failure {
      Self::Rejected
    } else {
      Self::Failed
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Allowed => "ALLOWED",
      Self::Failed => "FAILED",
      Self::Rejected => "REJECTED",
    }
  }
}

impl std::fmt::Display for ValidationOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A violation reported by a rule, tagged with the outcome it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
  pub rule: &'static str,
  pub operation_name: Option<String>,
  pub message: String,
  pub outcome: ValidationOutcome,
  pub locations: Vec<GraphQLErrorLocation>,
}

impl ValidationError {
  pub fn new(
    rule: &'static str,
    operation_name: Option<&str>,
    message: String,
    outcome: ValidationOutcome,
  ) -> Self {
    Self {
      rule,
      operation_name: operation_name.map(ToString::to_string),
      message,
      outcome,
      locations: vec![],
    }
  }

  pub fn at(mut self, location: GraphQLErrorLocation) -> Self {
    self.locations.push(location);
    self
  }

  pub fn is_rejected(&self) -> bool {
    self.outcome == ValidationOutcome::Rejected
  }
}

impl std::fmt::Display for ValidationError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)
  }
}

impl From<ValidationError> for GraphQLError {
  fn from(error: ValidationError) -> Self {
    GraphQLError::new(&error.message).with_locations(error.locations)
  }
}

/// Per-rule outcome counters, kept for observability only.
#[derive(Debug, Default)]
pub struct RuleCounters {
  allowed: AtomicU64,
  failed: AtomicU64,
  rejected: AtomicU64,
}

impl RuleCounters {
  pub fn record(&self, outcome: ValidationOutcome) {
    let counter = match outcome {
      ValidationOutcome::Allowed => &self.allowed,
      ValidationOutcome::Failed => &self.failed,
      ValidationOutcome::Rejected => &self.rejected,
    };

    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub fn allowed(&self) -> u64 {
    self.allowed.load(Ordering::Relaxed)
  }

  pub fn failed(&self) -> u64 {
    self.failed.load(Ordering::Relaxed)
  }

  pub fn rejected(&self) -> u64 {
    self.rejected.load(Ordering::Relaxed)
  }
}
