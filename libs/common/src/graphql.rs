use std::fmt::{Display, Formatter};

use bytes::Bytes;
use graphql_parser::{
  parse_query, parse_schema,
  query::{Definition, Document, OperationDefinition, ParseError},
  schema::ParseError as SchemaParseError,
};
use mime::APPLICATION_JSON;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Error as SerdeError, Map, Value};

use crate::{
  http::{
    extract_content_type, Mime, ShieldHttpRequest, ShieldHttpResponse, StatusCode, CONTENT_TYPE,
  },
  json::parse_and_extract_json_map_value,
};

pub const APPLICATION_GRAPHQL_JSON: &str = "application/graphql-response+json";
pub static APPLICATION_GRAPHQL_JSON_MIME: Lazy<Mime> = Lazy::new(|| {
  APPLICATION_GRAPHQL_JSON
    .parse::<Mime>()
    // @expected: we're parsing a statically defined constant, we know it works ;)
    .unwrap()
});

pub const PERSISTED_QUERY_EXTENSION: &str = "persistedQuery";
pub const PERSISTED_QUERY_HASH_FIELD: &str = "sha256Hash";

/// A single GraphQL operation, as sent over the wire. A batch holds several of these.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GraphQLRequest {
  // The GraphQL operation, as string
  #[serde(rename = "query", default, skip_serializing_if = "Option::is_none")]
  pub operation: Option<String>,
  // The operation name, if specified
  #[serde(
    rename = "operationName",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub operation_name: Option<String>,
  // GraphQL operation variables, in JSON format
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variables: Option<Value>,
  // GraphQL execution extensions, in JSON format
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extensions: Option<Map<String, Value>>,
}

impl GraphQLRequest {
  pub fn new(operation: impl Into<String>) -> Self {
    Self {
      operation: Some(operation.into()),
      ..Default::default()
    }
  }

  /// Literal operation text, when the client sent a non-empty one.
  pub fn operation_text(&self) -> Option<&str> {
    self.operation.as_deref().filter(|s| !s.trim().is_empty())
  }

  /// `extensions.persistedQuery.sha256Hash`, when present and a string.
  pub fn persisted_query_hash(&self) -> Option<&str> {
    self
      .extensions
      .as_ref()?
      .get(PERSISTED_QUERY_EXTENSION)?
      .get(PERSISTED_QUERY_HASH_FIELD)?
      .as_str()
  }

  /// Swaps a resolved persisted operation in, and drops the hash extension so
  /// only the literal text travels upstream.
  pub fn apply_persisted_operation(&mut self, operation: String, operation_name: Option<String>) {
    self.operation = Some(operation);
    self.operation_name = operation_name;

    if let Some(extensions) = &mut self.extensions {
      extensions.remove(PERSISTED_QUERY_EXTENSION);

      if extensions.is_empty() {
        self.extensions = None;
      }
    }
  }

  fn from_query_params(
    params: &std::collections::HashMap<String, String>,
  ) -> Result<Option<Self>, ExtractGraphQLOperationError> {
    let operation = params.get("query").cloned();
    let operation_name = params.get("operationName").cloned();
    let variables = match params.get("variables") {
      Some(raw) if !raw.is_empty() => Some(Value::Object(
        parse_and_extract_json_map_value(raw)
          .map_err(ExtractGraphQLOperationError::InvalidVariablesJsonFormat)?,
      )),
      _ => None,
    };
    let extensions = match params.get("extensions") {
      Some(raw) if !raw.is_empty() => Some(
        parse_and_extract_json_map_value(raw)
          .map_err(ExtractGraphQLOperationError::InvalidExtensionsJsonFormat)?,
      ),
      _ => None,
    };

    if operation.is_none() && extensions.is_none() {
      return Ok(None);
    }

    Ok(Some(Self {
      operation,
      operation_name,
      variables,
      extensions,
    }))
  }
}

impl Display for GraphQLRequest {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}",
      serde_json::to_string(self)
        .unwrap_or_else(|e| ExtractGraphQLOperationError::SerializationError(e).to_string())
    )
  }
}

/// The decoded request payload: a single object, or an array of operations.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQLBatch {
  Single(GraphQLRequest),
  Batch(Vec<GraphQLRequest>),
}

impl GraphQLBatch {
  pub fn from_slice(body: &[u8]) -> Result<Self, ExtractGraphQLOperationError> {
    let first = body.iter().copied().find(|b| !b.is_ascii_whitespace());

    match first {
      None => Err(ExtractGraphQLOperationError::EmptyExtraction),
      Some(b'[') => serde_json::from_slice::<Vec<GraphQLRequest>>(body)
        .map(GraphQLBatch::Batch)
        .map_err(ExtractGraphQLOperationError::InvalidBodyJsonFormat),
      Some(_) => serde_json::from_slice::<GraphQLRequest>(body)
        .map(GraphQLBatch::Single)
        .map_err(ExtractGraphQLOperationError::InvalidBodyJsonFormat),
    }
  }

  /// Decodes a POST body. A missing content-type is treated as `application/json`.
  pub fn new_from_http_post(
    http_request: &ShieldHttpRequest,
  ) -> Result<Self, ExtractGraphQLOperationError> {
    // see https://graphql.github.io/graphql-over-http/draft/#sec-POST
    let content_type = extract_content_type(&http_request.headers).unwrap_or(APPLICATION_JSON);

    if content_type.type_() != mime::APPLICATION_JSON.type_()
      || content_type.subtype() != mime::APPLICATION_JSON.subtype()
    {
      return Err(ExtractGraphQLOperationError::InvalidContentTypeHeader);
    }

    Self::from_slice(&http_request.body)
  }

  /// Decodes the query-string form of a request. `Ok(None)` means the request
  /// carries no GraphQL parameters at all.
  pub fn new_from_http_get(
    http_request: &ShieldHttpRequest,
  ) -> Result<Option<Self>, ExtractGraphQLOperationError> {
    GraphQLRequest::from_query_params(&http_request.query_params())
      .map(|request| request.map(GraphQLBatch::Single))
  }

  pub fn len(&self) -> usize {
    match self {
      GraphQLBatch::Single(_) => 1,
      GraphQLBatch::Batch(operations) => operations.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn operations(&self) -> &[GraphQLRequest] {
    match self {
      GraphQLBatch::Single(op) => std::slice::from_ref(op),
      GraphQLBatch::Batch(ops) => ops,
    }
  }

  pub fn operations_mut(&mut self) -> &mut [GraphQLRequest] {
    match self {
      GraphQLBatch::Single(op) => std::slice::from_mut(op),
      GraphQLBatch::Batch(ops) => ops,
    }
  }

  pub fn to_bytes(&self) -> Result<Bytes, SerdeError> {
    match self {
      GraphQLBatch::Single(op) => serde_json::to_vec(op),
      GraphQLBatch::Batch(ops) => serde_json::to_vec(ops),
    }
    .map(Bytes::from)
  }
}

#[derive(thiserror::Error, Debug)]
pub enum ExtractGraphQLOperationError {
  #[error("invalid content-type header")]
  InvalidContentTypeHeader,
  #[error("invalid body json format")]
  InvalidBodyJsonFormat(SerdeError),
  #[error("invalid variables json format")]
  InvalidVariablesJsonFormat(SerdeError),
  #[error("invalid extensions json format")]
  InvalidExtensionsJsonFormat(SerdeError),
  #[error("failed to locate any GraphQL operation in request")]
  EmptyExtraction,
  #[error("serialization error")]
  SerializationError(SerdeError),
}

impl ExtractGraphQLOperationError {
  pub fn into_response(&self) -> ShieldHttpResponse {
    GraphQLResponse::new_error(self.to_string().as_str()).into()
  }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct GraphQLErrorLocation {
  pub line: usize,
  pub column: usize,
}

/// An error with a message and optional extensions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GraphQLError {
  /// The error message.
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub locations: Option<Vec<GraphQLErrorLocation>>,
  /// Extensions to the error.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extensions: Option<Map<String, Value>>,
}

impl std::fmt::Display for GraphQLError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)
  }
}

impl GraphQLError {
  pub fn new(message: &str) -> Self {
    GraphQLError {
      message: message.to_string(),
      locations: None,
      extensions: None,
    }
  }

  pub fn with_locations(mut self, locations: Vec<GraphQLErrorLocation>) -> Self {
    if !locations.is_empty() {
      self.locations = Some(locations);
    }

    self
  }
}

pub type ParsedGraphQLDocument = Document<'static, String>;
pub type ParsedGraphQLSchema = graphql_parser::schema::Document<'static, String>;

/// The rejection envelope: `data` is always present (as `null`) on errors.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GraphQLResponse {
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub errors: Option<Vec<GraphQLError>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extensions: Option<Value>,
}

impl GraphQLResponse {
  pub fn new_error(error: &str) -> Self {
    Self::new_errors(vec![GraphQLError::new(error)])
  }

  pub fn new_errors(errors: Vec<GraphQLError>) -> Self {
    GraphQLResponse {
      data: None,
      errors: Some(errors),
      extensions: None,
    }
  }

  pub fn into_with_status_code(self, code: StatusCode) -> ShieldHttpResponse {
    let mut response: ShieldHttpResponse = self.into();
    response.status = code;
    response
  }
}

impl From<GraphQLResponse> for Bytes {
  fn from(response: GraphQLResponse) -> Self {
    serde_json::to_vec(&response)
      .unwrap_or_else(|e| {
        ExtractGraphQLOperationError::SerializationError(e)
          .to_string()
          .into_bytes()
      })
      .into()
  }
}

impl From<GraphQLResponse> for ShieldHttpResponse {
  fn from(response: GraphQLResponse) -> Self {
    let mut headers = crate::http::HttpHeadersMap::new();
    headers.insert(
      CONTENT_TYPE,
      crate::http::HeaderValue::from_static("application/json"),
    );

    ShieldHttpResponse {
      body: response.into(),
      status: StatusCode::OK,
      headers,
    }
  }
}

pub fn parse_graphql_operation(operation_str: &str) -> Result<ParsedGraphQLDocument, ParseError> {
  parse_query::<String>(operation_str).map(|v| v.into_static())
}

pub fn parse_graphql_schema(schema_str: &str) -> Result<ParsedGraphQLSchema, SchemaParseError> {
  parse_schema::<String>(schema_str).map(|v| v.into_static())
}

pub fn operation_definition_name<'a>(
  operation: &'a OperationDefinition<'static, String>,
) -> Option<&'a str> {
  match operation {
    OperationDefinition::SelectionSet(_) => None,
    OperationDefinition::Query(q) => q.name.as_deref(),
    OperationDefinition::Mutation(m) => m.name.as_deref(),
    OperationDefinition::Subscription(s) => s.name.as_deref(),
  }
}

pub fn operations_of(
  document: &ParsedGraphQLDocument,
) -> impl Iterator<Item = &OperationDefinition<'static, String>> {
  document.definitions.iter().filter_map(|d| match d {
    Definition::Operation(op) => Some(op),
    Definition::Fragment(_) => None,
  })
}
