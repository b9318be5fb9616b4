use std::collections::{HashMap, HashSet};

use graphql_parser::query::{Selection, SelectionSet};
use shield_common::graphql::{operation_definition_name, operations_of, ParsedGraphQLDocument};
use tracing::debug;

use crate::{
  config::RuleConfig,
  outcome::{RuleCounters, ValidationError, ValidationOutcome},
};

use super::{fragments_of, operation_location, operation_selection_set, DocumentRule, Fragments};

pub const RULE_NAME: &str = "max_depth";

#[derive(Debug)]
pub struct MaxDepthRule {
  config: RuleConfig,
  counters: RuleCounters,
}

impl MaxDepthRule {
  pub fn new(config: RuleConfig) -> Self {
    Self {
      config,
      counters: RuleCounters::default(),
    }
  }
}

impl DocumentRule for MaxDepthRule {
  fn name(&self) -> &'static str {
    RULE_NAME
  }

  fn counters(&self) -> &RuleCounters {
    &self.counters
  }

  fn check(&self, document: &ParsedGraphQLDocument) -> Vec<ValidationError> {
    if !self.config.enabled {
      return vec![];
    }

    let fragments = fragments_of(document);
    let mut measure = DepthMeasure::new(&fragments);
    let mut errors = vec![];

    for operation in operations_of(document) {
      let found = measure.selection_set(operation_selection_set(operation));
      let name = operation_definition_name(operation);
      debug!("operation {:?} has a depth of {}", name, found);

      if found <= self.config.max {
        self.counters.record(ValidationOutcome::Allowed);
        continue;
      }

      let outcome = ValidationOutcome::for_violation(self.config.reject_on_failure);
      self.counters.record(outcome);
      errors.push(
        ValidationError::new(
          RULE_NAME,
          name,
          format!(
            "syntax error: Depth limit of {} exceeded, found {}",
            self.config.max, found
          ),
          outcome,
        )
        .at(operation_location(operation)),
      );
    }

    errors
  }
}

/// A leaf field is 1 deep, a field with children is one more than its deepest child.
/// Spreads and inline fragments add no level of their own.
struct DepthMeasure<'d> {
  fragments: &'d Fragments<'d>,
  fragment_depths: HashMap<&'d str, usize>,
  visiting: HashSet<&'d str>,
}

impl<'d> DepthMeasure<'d> {
  fn new(fragments: &'d Fragments<'d>) -> Self {
    Self {
      fragments,
      fragment_depths: HashMap::new(),
      visiting: HashSet::new(),
    }
  }

  fn selection_set(&mut self, selection_set: &'d SelectionSet<'static, String>) -> usize {
    selection_set
      .items
      .iter()
      .map(|selection| self.selection(selection))
      .max()
      .unwrap_or(0)
  }

  fn selection(&mut self, selection: &'d Selection<'static, String>) -> usize {
    match selection {
      Selection::Field(field) => 1 + self.selection_set(&field.selection_set),
      Selection::InlineFragment(inline) => self.selection_set(&inline.selection_set),
      Selection::FragmentSpread(spread) => self.fragment(&spread.fragment_name),
    }
  }

  fn fragment(&mut self, name: &'d str) -> usize {
    if let Some(depth) = self.fragment_depths.get(name) {
      return *depth;
    }

    let fragments = self.fragments;
    let Some(fragment) = fragments.get(name).copied() else {
      return 0;
    };
    if !self.visiting.insert(name) {
      return 0;
    }

    let depth = self.selection_set(&fragment.selection_set);
    self.visiting.remove(name);
    self.fragment_depths.insert(name, depth);

    depth
  }
}

#[cfg(test)]
mod tests {
  use shield_common::graphql::parse_graphql_operation;

  use super::*;

  fn depth_errors(max: usize, operation: &str) -> Vec<ValidationError> {
    let document = parse_graphql_operation(operation).unwrap();
    MaxDepthRule::new(RuleConfig::new(max)).check(&document)
  }

  #[test]
  fn flat_operation_has_depth_one() {
    assert!(depth_errors(1, "{ a b c }").is_empty());
    assert!(depth_errors(0, "{ a b c }")[0].message.ends_with("found 1"));
  }

  #[test]
  fn each_nesting_level_adds_one() {
    let operation = "query Deep { a { b { c { d } } } other }";

    assert!(depth_errors(4, operation).is_empty());

    let errors = depth_errors(3, operation);
    assert_eq!(errors.len(), 1);
    assert_eq!(
      errors[0].message,
      "syntax error: Depth limit of 3 exceeded, found 4"
    );
    assert_eq!(errors[0].operation_name.as_deref(), Some("Deep"));
  }

  #[test]
  fn fragment_spread_adds_no_level() {
    let with_fragment = "{ a { ...F } } fragment F on A { b { c } }";
    let inlined = "{ a { b { c } } }";

    assert!(depth_errors(3, with_fragment).is_empty());
    assert!(depth_errors(2, with_fragment)[0].message.ends_with("found 3"));
    assert!(depth_errors(2, inlined)[0].message.ends_with("found 3"));
  }

  #[test]
  fn inline_fragment_adds_no_level() {
    let operation = "{ a { ... on A { b } } }";

    assert!(depth_errors(2, operation).is_empty());
    assert_eq!(depth_errors(1, operation).len(), 1);
  }

  #[test]
  fn cyclic_fragments_terminate() {
    let operation = "{ a { ...F } } fragment F on A { b { ...F } }";

    assert!(depth_errors(3, operation).is_empty());
  }

  #[test]
  fn observe_only() {
    let rule = MaxDepthRule::new(RuleConfig::new(1).observe_only());
    let document = parse_graphql_operation("{ a { b } }").unwrap();
    let errors = rule.check(&document);

    assert_eq!(errors[0].outcome, ValidationOutcome::Failed);
    assert_eq!(rule.counters().failed(), 1);
  }
}
