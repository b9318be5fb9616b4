use std::fmt::Debug;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use shield_common::http::{ShieldHttpResponse, CONTENT_LENGTH};
use shield_config::ResponseConfig;
use tracing::{debug, warn};

pub const REDACTED_ERRORS_MESSAGE: &str = "Error(s) redacted";

lazy_static! {
  static ref FIELD_SUGGESTION_REGEX: Regex =
    // @expected: the pattern is a constant
    Regex::new(r"Did you mean[^?]*\?").unwrap();
}

/// A transformation of the upstream GraphQL response, applied before it is
/// written back to the client.
pub trait ResponseProcessor: Debug + Send + Sync {
  fn name(&self) -> &'static str;
  fn process(&self, body: &mut Value);
}

fn errors_of(body: &mut Value) -> Option<&mut Vec<Value>> {
  match body.get_mut("errors") {
    Some(Value::Array(errors)) if !errors.is_empty() => Some(errors),
    _ => None,
  }
}

/// Replaces every upstream error with one generic error.
#[derive(Debug, Default)]
pub struct ObfuscateUpstreamErrors;

impl ResponseProcessor for ObfuscateUpstreamErrors {
  fn name(&self) -> &'static str {
    "obfuscate_upstream_errors"
  }

  fn process(&self, body: &mut Value) {
    if let Some(errors) = errors_of(body) {
      *errors = vec![json!({ "message": REDACTED_ERRORS_MESSAGE })];
    }
  }
}

/// Masks the `Did you mean ...?` hints in error messages.
#[derive(Debug)]
pub struct BlockFieldSuggestions {
  mask: String,
}

impl BlockFieldSuggestions {
  pub fn new(mask: impl Into<String>) -> Self {
    Self { mask: mask.into() }
  }
}

impl ResponseProcessor for BlockFieldSuggestions {
  fn name(&self) -> &'static str {
    "block_field_suggestions"
  }

  fn process(&self, body: &mut Value) {
    let Some(errors) = errors_of(body) else {
      return;
    };

    for error in errors.iter_mut() {
      if let Some(Value::String(message)) = error.get_mut("message") {
        if FIELD_SUGGESTION_REGEX.is_match(message) {
          *message = FIELD_SUGGESTION_REGEX
            .replace_all(message, self.mask.as_str())
            .into_owned();
        }
      }
    }
  }
}

pub fn processors_from_config(config: &ResponseConfig) -> Vec<Box<dyn ResponseProcessor>> {
  let mut processors: Vec<Box<dyn ResponseProcessor>> = vec![];

  if config.block_field_suggestions.enabled {
    processors.push(Box::new(BlockFieldSuggestions::new(
      config.block_field_suggestions.mask.clone(),
    )));
  }

  if config.obfuscate_upstream_errors {
    processors.push(Box::new(ObfuscateUpstreamErrors));
  }

  processors
}

/// Runs the processors over a JSON response. Other bodies, and JSON that does
/// not parse, pass through untouched.
pub fn apply_processors(
  processors: &[Box<dyn ResponseProcessor>],
  response: &mut ShieldHttpResponse,
) {
  if processors.is_empty() || !response.is_json() {
    return;
  }

  let mut body: Value = match response.json_body() {
    Ok(body) => body,
    Err(e) => {
      debug!("upstream response is not valid json, skipping post-processing: {}", e);
      return;
    }
  };

  for processor in processors {
    processor.process(&mut body);
  }

  match serde_json::to_vec(&body) {
    Ok(bytes) => {
      response.body = bytes.into();
      response.headers.remove(CONTENT_LENGTH);
    }
    Err(e) => warn!("failed to serialize processed response: {}", e),
  }
}
