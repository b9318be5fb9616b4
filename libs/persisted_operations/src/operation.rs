use std::collections::HashMap;

use serde::Serialize;
use shield_common::lexer::{Lexer, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedOperation {
  #[serde(rename = "operation")]
  pub operation_text: String,
  #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
  pub operation_name: Option<String>,
}

impl PersistedOperation {
  pub fn new(operation_text: impl Into<String>) -> Self {
    let operation_text = operation_text.into();
    let operation_name = derive_operation_name(&operation_text);

    Self {
      operation_text,
      operation_name,
    }
  }
}

pub type PersistedOperationsTable = HashMap<String, PersistedOperation>;

/// Name of a `query` or `mutation` operation, read from the tokens that
/// precede its variable definitions or selection set.
///
/// Anonymous operations, shorthand `{ ... }` documents and anything that fails
/// to lex yield `None`.
pub fn derive_operation_name(operation_text: &str) -> Option<String> {
  let mut tokens = Lexer::new(operation_text);

  match tokens.next()? {
    Ok(token) if token.kind == TokenKind::Name && matches!(token.value, "query" | "mutation") => {}
    _ => return None,
  }

  match tokens.next()? {
    Ok(token) if token.kind == TokenKind::Name => Some(token.value.to_string()),
    _ => None,
  }
}
