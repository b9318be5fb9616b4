use std::collections::{HashMap, HashSet};

use graphql_parser::query::{Selection, SelectionSet};
use shield_common::graphql::{operation_definition_name, operations_of, ParsedGraphQLDocument};
use tracing::debug;

use crate::{
  config::RuleConfig,
  outcome::{RuleCounters, ValidationError, ValidationOutcome},
};

use super::{fragments_of, operation_location, operation_selection_set, DocumentRule, Fragments};

pub const RULE_NAME: &str = "max_aliases";

#[derive(Debug)]
pub struct MaxAliasesRule {
  config: RuleConfig,
  counters: RuleCounters,
}

impl MaxAliasesRule {
  pub fn new(config: RuleConfig) -> Self {
    Self {
      config,
      counters: RuleCounters::default(),
    }
  }
}

impl DocumentRule for MaxAliasesRule {
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
    let mut counter = AliasCounter::new(&fragments);
    let mut errors = vec![];

    for operation in operations_of(document) {
      let found = counter.selection_set(operation_selection_set(operation));
      let name = operation_definition_name(operation);
      debug!("operation {:?} holds {} aliases", name, found);

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
            "syntax error: Aliases limit of {} exceeded, found {}",
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

/// Counts aliased fields. A fragment is walked once and its count reused for every spread.
struct AliasCounter<'d> {
  fragments: &'d Fragments<'d>,
  fragment_counts: HashMap<&'d str, usize>,
  visiting: HashSet<&'d str>,
}

impl<'d> AliasCounter<'d> {
  fn new(fragments: &'d Fragments<'d>) -> Self {
    Self {
      fragments,
      fragment_counts: HashMap::new(),
      visiting: HashSet::new(),
    }
  }

  fn selection_set(&mut self, selection_set: &'d SelectionSet<'static, String>) -> usize {
    selection_set
      .items
      .iter()
      .map(|selection| self.selection(selection))
      .sum()
  }

  fn selection(&mut self, selection: &'d Selection<'static, String>) -> usize {
    match selection {
      Selection::Field(field) => {
        let aliased = matches!(&field.alias, Some(alias) if *alias != field.name);

        usize::from(aliased) + self.selection_set(&field.selection_set)
      }
      Selection::InlineFragment(inline) => self.selection_set(&inline.selection_set),
      Selection::FragmentSpread(spread) => self.fragment(&spread.fragment_name),
    }
  }

  fn fragment(&mut self, name: &'d str) -> usize {
    if let Some(count) = self.fragment_counts.get(name) {
      return *count;
    }

    // cycles are reported by the baseline rules, they contribute nothing here
    let fragments = self.fragments;
    let Some(fragment) = fragments.get(name).copied() else {
      return 0;
    };
    if !self.visiting.insert(name) {
      return 0;
    }

    let count = self.selection_set(&fragment.selection_set);
    self.visiting.remove(name);
    self.fragment_counts.insert(name, count);

    count
  }
}
