use graphql_tools::validation::{
  rules::default_rules_validation_plan,
  validate::{validate, ValidationPlan},
};
use shield_common::{
  graphql::{
    parse_graphql_operation, GraphQLErrorLocation, ParsedGraphQLDocument, ParsedGraphQLSchema,
  },
  lexer::LexerError,
  ParseError,
};
use tracing::debug;

use crate::{
  config::ValidationConfig,
  outcome::{RuleCounters, ValidationError, ValidationOutcome},
  rules::{DocumentRule, MaxAliasesRule, MaxBatchRule, MaxDepthRule, MaxTokensRule},
};

pub const BASELINE_RULE_NAME: &str = "graphql";

thread_local! {
  static BASELINE_PLAN: ValidationPlan = default_rules_validation_plan();
}

/// Stops the checks of a single operation. Always blocking.
#[derive(Debug, thiserror::Error)]
pub enum OperationCheckError {
  #[error("{0}")]
  Lexer(#[from] LexerError),
  #[error("{0}")]
  Parse(#[from] ParseError),
}

/// The rules of one pipeline, built once from configuration.
#[derive(Debug)]
pub struct Validator {
  max_tokens: MaxTokensRule,
  max_batch: MaxBatchRule,
  rules: Vec<Box<dyn DocumentRule>>,
  schema_validation: bool,
  baseline_counters: RuleCounters,
  hide_errors: bool,
}

impl Validator {
  pub fn new(config: &ValidationConfig) -> Self {
    let rules: Vec<Box<dyn DocumentRule>> = vec![
      Box::new(MaxDepthRule::new(config.max_depth)),
      Box::new(MaxAliasesRule::new(config.max_aliases)),
    ];

    Self {
      max_tokens: MaxTokensRule::new(config.max_tokens),
      max_batch: MaxBatchRule::new(config.max_batch),
      rules,
      schema_validation: config.schema_validation,
      baseline_counters: RuleCounters::default(),
      hide_errors: config.hide_errors,
    }
  }

  pub fn hide_errors(&self) -> bool {
    self.hide_errors
  }

  pub fn check_batch(&self, batch_size: usize) -> Option<ValidationError> {
    self.max_batch.check(batch_size)
  }

  /// Token count, then parse, then the document rules and, when a schema is
  /// given, the standard GraphQL validation.
  ///
  /// A rejected token count stops here. Violations that are only observed are
  /// returned too, tagged with [`ValidationOutcome::Failed`].
  pub fn validate_operation(
    &self,
    operation_text: &str,
    operation_name: Option<&str>,
    schema: Option<&ParsedGraphQLSchema>,
  ) -> Result<Vec<ValidationError>, OperationCheckError> {
    let mut errors = vec![];

    if let Some(error) = self.max_tokens.check(operation_text, operation_name)? {
      let rejected = error.is_rejected();
      errors.push(error);

      if rejected {
        return Ok(errors);
      }
    }

    let document = parse_graphql_operation(operation_text)?;

    for rule in self.rules.iter() {
      errors.extend(rule.check(&document));
    }

    match schema {
      Some(schema) if self.schema_validation => {
        errors.extend(self.validate_against_schema(schema, &document, operation_name));
      }
      _ => debug!("no schema available, skipping schema validation"),
    }

    Ok(errors)
  }

  fn validate_against_schema(
    &self,
    schema: &ParsedGraphQLSchema,
    document: &ParsedGraphQLDocument,
    operation_name: Option<&str>,
  ) -> Vec<ValidationError> {
    let errors = BASELINE_PLAN.with(|plan| validate(schema, document, plan));

    if errors.is_empty() {
      self.baseline_counters.record(ValidationOutcome::Allowed);
      return vec![];
    }

    self.baseline_counters.record(ValidationOutcome::Rejected);

    errors
      .into_iter()
      .map(|error| ValidationError {
        rule: BASELINE_RULE_NAME,
        operation_name: operation_name.map(ToString::to_string),
        message: error.message,
        outcome: ValidationOutcome::Rejected,
        locations: error
          .locations
          .iter()
          .map(|pos| GraphQLErrorLocation {
            line: pos.line,
            column: pos.column,
          })
          .collect(),
      })
      .collect()
  }

  pub fn rule_counters(&self) -> Vec<(&'static str, &RuleCounters)> {
    let mut counters = vec![
      (crate::rules::max_tokens::RULE_NAME, self.max_tokens.counters()),
      (crate::rules::max_batch::RULE_NAME, self.max_batch.counters()),
    ];
    counters.extend(self.rules.iter().map(|rule| (rule.name(), rule.counters())));
    counters.push((BASELINE_RULE_NAME, &self.baseline_counters));

    counters
  }
}

#[cfg(test)]
mod tests {
  use shield_common::graphql::parse_graphql_schema;

  use super::*;
  use crate::config::RuleConfig;

  fn config() -> ValidationConfig {
    ValidationConfig {
      max_depth: RuleConfig::new(3),
      max_aliases: RuleConfig::new(3),
      max_tokens: RuleConfig::new(50),
      max_batch: RuleConfig::new(2),
      schema_validation: true,
      hide_errors: false,
    }
  }

  const SCHEMA: &str = r#"
    type Query { product(id: ID!): Product }
    type Product { id: ID! name: String related: Product }
  "#;

  #[test]
  fn clean_operation() {
    let validator = Validator::new(&config());
    let schema = parse_graphql_schema(SCHEMA).unwrap();

    let errors = validator
      .validate_operation("query Foo { product(id: 1) { id name } }", Some("Foo"), Some(&schema))
      .unwrap();

    assert!(errors.is_empty());
  }

  #[test]
  fn rejected_token_count_stops_before_parse() {
    let mut config = config();
    config.max_tokens = RuleConfig::new(2);
    let validator = Validator::new(&config);

    // would also fail to parse
    let errors = validator.validate_operation("{ a b c", None, None).unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].rule, "max_tokens");
  }

  #[test]
  fn observed_token_count_keeps_going() {
    let mut config = config();
    config.max_tokens = RuleConfig::new(2).observe_only();
    config.max_depth = RuleConfig::new(1);
    let validator = Validator::new(&config);

    let errors = validator.validate_operation("{ a { b } }", None, None).unwrap();

    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].outcome, ValidationOutcome::Failed);
    assert_eq!(errors[1].rule, "max_depth");
    assert!(errors[1].is_rejected());
  }

  #[test]
  fn parse_and_lexer_errors() {
    let validator = Validator::new(&config());

    assert!(matches!(
      validator.validate_operation("{ a", None, None),
      Err(OperationCheckError::Parse(_))
    ));
    assert!(matches!(
      validator.validate_operation("{ a ^ }", None, None),
      Err(OperationCheckError::Lexer(_))
    ));
  }

  #[test]
  fn depth_and_aliases_run_without_schema() {
    let validator = Validator::new(&config());
    let errors = validator
      .validate_operation("{ a: x b: x c: x d: x e { f { g { h } } } }", None, None)
      .unwrap();

    let rules = errors.iter().map(|e| e.rule).collect::<Vec<_>>();
    assert_eq!(rules, vec!["max_depth", "max_aliases"]);
  }

  #[test]
  fn unknown_field_fails_schema_validation() {
    let validator = Validator::new(&config());
    let schema = parse_graphql_schema(SCHEMA).unwrap();

    let errors = validator
      .validate_operation("{ product(id: 1) { unknown } }", None, Some(&schema))
      .unwrap();

    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| e.rule == BASELINE_RULE_NAME && e.is_rejected()));
  }

  #[test]
  fn schema_validation_can_be_turned_off() {
    let mut config = config();
    config.schema_validation = false;
    let validator = Validator::new(&config);
    let schema = parse_graphql_schema(SCHEMA).unwrap();

    let errors = validator
      .validate_operation("{ product(id: 1) { unknown } }", None, Some(&schema))
      .unwrap();

    assert!(errors.is_empty());
  }

  #[test]
  fn separate_validators_do_not_share_state() {
    let strict = Validator::new(&config());
    let mut relaxed_config = config();
    relaxed_config.max_batch = RuleConfig::new(10);
    let relaxed = Validator::new(&relaxed_config);

    assert!(strict.check_batch(3).is_some());
    assert!(relaxed.check_batch(3).is_none());

    let counters = strict.rule_counters();
    let (_, batch) = counters.iter().find(|(name, _)| *name == "max_batch").unwrap();
    assert_eq!(batch.rejected(), 1);
  }
}
