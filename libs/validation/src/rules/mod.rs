use std::{collections::HashMap, fmt::Debug};

use graphql_parser::query::{FragmentDefinition, OperationDefinition, SelectionSet};
use shield_common::{
  graphql::{GraphQLErrorLocation, ParsedGraphQLDocument},
  Definition,
};

use crate::outcome::{RuleCounters, ValidationError};

pub mod max_aliases;
pub mod max_batch;
pub mod max_depth;
pub mod max_tokens;

pub use max_aliases::MaxAliasesRule;
pub use max_batch::MaxBatchRule;
pub use max_depth::MaxDepthRule;
pub use max_tokens::MaxTokensRule;

pub(crate) type Fragments<'d> = HashMap<&'d str, &'d FragmentDefinition<'static, String>>;

/// A structural check over a parsed operation document.
pub trait DocumentRule: Send + Sync + Debug {
  fn name(&self) -> &'static str;

  fn counters(&self) -> &RuleCounters;

  /// Reports one error per operation definition that exceeds the limit.
  fn check(&self, document: &ParsedGraphQLDocument) -> Vec<ValidationError>;
}

pub(crate) fn fragments_of(document: &ParsedGraphQLDocument) -> Fragments<'_> {
  document
    .definitions
    .iter()
    .filter_map(|definition| match definition {
      Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
      Definition::Operation(_) => None,
    })
    .collect()
}

pub(crate) fn operation_selection_set<'d>(
  operation: &'d OperationDefinition<'static, String>,
) -> &'d SelectionSet<'static, String> {
  match operation {
    OperationDefinition::SelectionSet(set) => set,
    OperationDefinition::Query(q) => &q.selection_set,
    OperationDefinition::Mutation(m) => &m.selection_set,
    OperationDefinition::Subscription(s) => &s.selection_set,
  }
}

pub(crate) fn operation_location(
  operation: &OperationDefinition<'static, String>,
) -> GraphQLErrorLocation {
  let position = match operation {
    OperationDefinition::SelectionSet(set) => set.span.0,
    OperationDefinition::Query(q) => q.position,
    OperationDefinition::Mutation(m) => m.position,
    OperationDefinition::Subscription(s) => s.position,
  };

  GraphQLErrorLocation {
    line: position.line,
    column: position.column,
  }
}
