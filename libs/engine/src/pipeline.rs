use std::{fmt::Debug, sync::Arc};

use shield_common::{
  graphql::{ExtractGraphQLOperationError, GraphQLBatch, GraphQLError, GraphQLResponse},
  http::{
    HeaderValue, Method, ShieldHttpRequest, ShieldHttpResponse, StatusCode, CONTENT_TYPE,
  },
};
use shield_config::ShieldConfig;
use shield_persisted_operations::{
  PersistedOperationsStore, PERSISTED_OPERATION_NOT_FOUND, PERSISTED_QUERY_NOT_FOUND,
};
use shield_validation::Validator;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::{
  access_log::AccessLogger,
  body_limit::check_body_size,
  postprocess::{
    apply_processors, processors_from_config, ResponseProcessor, REDACTED_ERRORS_MESSAGE,
  },
  request_execution_context::RequestExecutionContext,
  schema_awareness::SchemaAwareness,
  source::runtime::SourceRuntime,
};

const GRAPHQL_QUERY_PARAMS: [&str; 4] = ["query", "operationName", "variables", "extensions"];

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
  Forwarded,
  Rejected,
}

/// Runs every inbound request through the protection stages, in order, and
/// either rejects it or hands it to the upstream source.
pub struct ProtectionPipeline {
  post_only: bool,
  max_body_bytes: Option<usize>,
  persisted_operations_enabled: bool,
  reject_unpersisted: bool,
  store: Option<Arc<PersistedOperationsStore>>,
  schema: Arc<SchemaAwareness>,
  validator: Validator,
  access_logger: AccessLogger,
  processors: Vec<Box<dyn ResponseProcessor>>,
  source: Arc<dyn SourceRuntime>,
}

impl Debug for ProtectionPipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProtectionPipeline")
      .field("post_only", &self.post_only)
      .field("max_body_bytes", &self.max_body_bytes)
      .field("persisted_operations_enabled", &self.persisted_operations_enabled)
      .field("reject_unpersisted", &self.reject_unpersisted)
      .field("validator", &self.validator)
      .field("processors", &self.processors)
      .finish()
  }
}

impl ProtectionPipeline {
  pub fn new(
    config: &ShieldConfig,
    store: Option<Arc<PersistedOperationsStore>>,
    schema: Arc<SchemaAwareness>,
    source: Arc<dyn SourceRuntime>,
  ) -> Self {
    let persisted = &config.persisted_operations;

    if persisted.enabled && store.is_none() {
      warn!("persisted operations are enabled without a store, every lookup will miss");
    }

    Self {
      post_only: config.web.post_only,
      max_body_bytes: config.web.max_body_bytes,
      persisted_operations_enabled: persisted.enabled,
      reject_unpersisted: persisted.reject_on_failure,
      store,
      schema,
      validator: Validator::new(&config.validation),
      access_logger: AccessLogger::new(config.access_logging.clone()),
      processors: processors_from_config(&config.response),
      source,
    }
  }

  pub fn validator(&self) -> &Validator {
    &self.validator
  }

  pub fn store(&self) -> Option<&Arc<PersistedOperationsStore>> {
    self.store.as_ref()
  }

  pub async fn execute(&self, request: ShieldHttpRequest) -> ShieldHttpResponse {
    self.execute_with_outcome(request).await.0
  }

  #[tracing::instrument(level = "debug", skip(self, request), name = "ProtectionPipeline::execute")]
  pub async fn execute_with_outcome(
    &self,
    request: ShieldHttpRequest,
  ) -> (ShieldHttpResponse, PipelineOutcome) {
    let mut ctx = RequestExecutionContext::new(Ulid::new().to_string(), request);

    let stages: [fn(&Self, &mut RequestExecutionContext); 6] = [
      Self::method_gate,
      Self::body_size_guard,
      Self::decode,
      Self::resolve_persisted_operations,
      Self::batch_size_check,
      Self::validate_operations,
    ];

    for stage in stages {
      stage(self, &mut ctx);

      if let Some(response) = ctx.take_short_circuit() {
        debug!("request {} rejected", ctx.request_id);
        return (response, PipelineOutcome::Rejected);
      }
    }

    (self.forward(ctx).await, PipelineOutcome::Forwarded)
  }

  /// The method gate on its own. Only looks at the method and the query string,
  /// so callers can run it before the body is read.
  pub fn method_gate_rejection(&self, request: &ShieldHttpRequest) -> Option<ShieldHttpResponse> {
    if !self.post_only || request.method == Method::POST {
      return None;
    }

    let params = request.query_params();
    if !params.contains_key("query") && !params.contains_key("extensions") {
      return None;
    }

    debug!("non-POST GraphQL request blocked by method gate");

    Some(
      GraphQLResponse::new_error("GraphQL operations must be sent using POST")
        .into_with_status_code(StatusCode::METHOD_NOT_ALLOWED),
    )
  }

  fn method_gate(&self, ctx: &mut RequestExecutionContext) {
    if let Some(response) = self.method_gate_rejection(&ctx.downstream_http_request) {
      ctx.short_circuit(response);
    }
  }

  fn body_size_guard(&self, ctx: &mut RequestExecutionContext) {
    if let Err(e) = check_body_size(&ctx.downstream_http_request.body, self.max_body_bytes) {
      debug!("{}", e);
      ctx.short_circuit(e.into());
    }
  }

  fn decode(&self, ctx: &mut RequestExecutionContext) {
    let request = &ctx.downstream_http_request;
    let decoded = match request.method {
      Method::POST => GraphQLBatch::new_from_http_post(request).map(Some),
      _ => GraphQLBatch::new_from_http_get(request),
    };

    match decoded {
      Ok(Some(batch)) if batch.is_empty() => {
        ctx.short_circuit(ExtractGraphQLOperationError::EmptyExtraction.into_response());
      }
      Ok(Some(batch)) => {
        self
          .access_logger
          .log(&ctx.request_id, &ctx.downstream_http_request, &batch);
        ctx.downstream_graphql_batch = Some(batch);
      }
      Ok(None) => debug!("request carries no GraphQL parameters, forwarding as is"),
      Err(e) => {
        debug!("failed to decode GraphQL request: {:?}", e);
        ctx.short_circuit(e.into_response());
      }
    }
  }

  #[tracing::instrument(level = "debug", skip(self, ctx))]
  fn resolve_persisted_operations(&self, ctx: &mut RequestExecutionContext) {
    if !self.persisted_operations_enabled {
      return;
    }

    let Some(batch) = ctx.downstream_graphql_batch.as_mut() else {
      return;
    };

    // one snapshot for the whole request, a concurrent reload is not seen halfway
    let table = self.store.as_ref().map(|store| store.snapshot());
    let mut errors = vec![];
    let mut rewritten = false;

    for operation in batch.operations_mut() {
      if operation.operation_text().is_some() && !self.reject_unpersisted {
        continue;
      }

      let Some(hash) = operation.persisted_query_hash() else {
        errors.push(GraphQLError::new(PERSISTED_QUERY_NOT_FOUND));
        continue;
      };

      match table.as_ref().and_then(|table| table.get(hash)) {
        Some(persisted) => {
          debug!("resolved persisted operation {}", hash);
          operation.apply_persisted_operation(
            persisted.operation_text.clone(),
            persisted.operation_name.clone(),
          );
          rewritten = true;
        }
        None => {
          debug!("unknown persisted operation {}", hash);
          errors.push(GraphQLError::new(PERSISTED_OPERATION_NOT_FOUND));
        }
      }
    }

    ctx.rewritten |= rewritten;

    if !errors.is_empty() {
      ctx.short_circuit(GraphQLResponse::new_errors(errors).into());
    }
  }

  fn batch_size_check(&self, ctx: &mut RequestExecutionContext) {
    let Some(batch) = &ctx.downstream_graphql_batch else {
      return;
    };

    if let Some(error) = self.validator.check_batch(batch.len()) {
      if error.is_rejected() {
        let errors = vec![GraphQLError::from(error)];
        ctx.short_circuit(self.rejection(errors));
      } else {
        debug!("observed violation: {}", error);
      }
    }
  }

  #[tracing::instrument(level = "debug", skip(self, ctx))]
  fn validate_operations(&self, ctx: &mut RequestExecutionContext) {
    let Some(batch) = &ctx.downstream_graphql_batch else {
      return;
    };

    let schema = self.schema.schema();
    let mut blocking = vec![];

    for operation in batch.operations() {
      let Some(text) = operation.operation_text() else {
        blocking.push(GraphQLError::new(
          &ExtractGraphQLOperationError::EmptyExtraction.to_string(),
        ));
        continue;
      };

      match self.validator.validate_operation(
        text,
        operation.operation_name.as_deref(),
        schema.as_deref(),
      ) {
        Ok(errors) => {
          for error in errors {
            if error.is_rejected() {
              blocking.push(GraphQLError::from(error));
            } else {
              debug!("observed violation: {}", error);
            }
          }
        }
        Err(e) => blocking.push(GraphQLError::new(&e.to_string())),
      }
    }

    if !blocking.is_empty() {
      ctx.short_circuit(self.rejection(blocking));
    }
  }

  fn rejection(&self, errors: Vec<GraphQLError>) -> ShieldHttpResponse {
    if self.validator.hide_errors() {
      return GraphQLResponse::new_error(REDACTED_ERRORS_MESSAGE).into();
    }

    GraphQLResponse::new_errors(errors).into()
  }

  fn upstream_request(
    &self,
    ctx: RequestExecutionContext,
  ) -> Result<ShieldHttpRequest, ShieldHttpResponse> {
    let mut request = ctx.downstream_http_request;

    if !ctx.rewritten {
      return Ok(request);
    }

    let Some(batch) = ctx.downstream_graphql_batch else {
      return Ok(request);
    };

    request.body = batch.to_bytes().map_err(|e| {
      error!("failed to serialize rewritten request: {}", e);
      ExtractGraphQLOperationError::SerializationError(e).into_response()
    })?;

    if request.method != Method::POST {
      // the GraphQL parameters now travel in the body
      request.method = Method::POST;
      request.query_string = querystring::stringify(
        querystring::querify(&request.query_string)
          .into_iter()
          .filter(|(key, _)| !GRAPHQL_QUERY_PARAMS.contains(key))
          .collect(),
      )
      .trim_end_matches('&')
      .to_string();
    }

    request
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(request)
  }

  #[tracing::instrument(level = "debug", skip(self, ctx))]
  async fn forward(&self, ctx: RequestExecutionContext) -> ShieldHttpResponse {
    let request_id = ctx.request_id.clone();
    let request = match self.upstream_request(ctx) {
      Ok(request) => request,
      Err(response) => return response,
    };

    match self.source.forward(request).await {
      Ok(mut response) => {
        apply_processors(&self.processors, &mut response);
        response
      }
      Err(e) => {
        error!("request {} failed upstream: {}", request_id, e);
        e.into()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde_json::{json, Value};
  use shield_config::{RuleConfig, UpstreamConfig};
  use shield_persisted_operations::{
    loader::MemoryLoader, PersistedOperationsReloadConfig,
  };

  use super::*;
  use crate::source::mock_source::MockedSourceRuntime;

  fn config() -> ShieldConfig {
    serde_json::from_value(json!({
      "upstream": { "endpoint": "http://upstream/graphql" },
      "response": {
        "obfuscate_upstream_errors": false,
        "block_field_suggestions": { "enabled": false }
      }
    }))
    .unwrap()
  }

  fn pipeline(config: &ShieldConfig, source: &MockedSourceRuntime) -> ProtectionPipeline {
    ProtectionPipeline::new(
      config,
      None,
      Arc::new(SchemaAwareness::empty()),
      Arc::new(source.clone()),
    )
  }

  fn post(body: Value) -> ShieldHttpRequest {
    ShieldHttpRequest {
      body: body.to_string().into(),
      ..Default::default()
    }
  }

  fn errors(response: &ShieldHttpResponse) -> Vec<String> {
    let body: Value = response.json_body().unwrap();

    body["errors"]
      .as_array()
      .map(|errors| {
        errors
          .iter()
          .map(|e| e["message"].as_str().unwrap_or_default().to_string())
          .collect()
      })
      .unwrap_or_default()
  }

  #[tokio::test]
  async fn clean_request_is_forwarded_untouched() {
    let source = MockedSourceRuntime::with_data(json!({ "a": 1 }));
    let request = post(json!({ "query": "{ a }" }));
    let original_body = request.body.clone();

    let (response, outcome) = pipeline(&config(), &source)
      .execute_with_outcome(request)
      .await;

    assert_eq!(outcome, PipelineOutcome::Forwarded);
    assert!(errors(&response).is_empty());
    assert_eq!(source.received()[0].body, original_body);
  }

  #[tokio::test]
  async fn method_gate_only_applies_to_graphql_parameters() {
    let mut config = config();
    config.web.post_only = true;
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = pipeline(&config, &source);

    let blocked = pipeline
      .execute(ShieldHttpRequest {
        method: Method::GET,
        query_string: "query=%7B%20a%20%7D".to_string(),
        body: Default::default(),
        ..Default::default()
      })
      .await;
    assert_eq!(blocked.status, StatusCode::METHOD_NOT_ALLOWED);

    let passed = pipeline
      .execute(ShieldHttpRequest {
        method: Method::GET,
        query_string: "".to_string(),
        body: Default::default(),
        ..Default::default()
      })
      .await;
    assert_eq!(passed.status, StatusCode::OK);
    assert_eq!(source.received().len(), 1);
  }

  #[tokio::test]
  async fn oversized_body_skips_everything_else() {
    let mut config = config();
    config.web.max_body_bytes = Some(8);
    let source = MockedSourceRuntime::with_data(json!({}));

    let (response, outcome) = pipeline(&config, &source)
      .execute_with_outcome(post(json!({ "query": "{ a }" })))
      .await;

    assert_eq!(outcome, PipelineOutcome::Rejected);
    assert_eq!(
      errors(&response),
      vec!["request body exceeds the maximum of 8 bytes"]
    );
    assert!(source.received().is_empty());
  }

  #[tokio::test]
  async fn malformed_json_is_blocking() {
    let source = MockedSourceRuntime::with_data(json!({}));
    let request = ShieldHttpRequest {
      body: "{ not json".into(),
      ..Default::default()
    };

    let (_, outcome) = pipeline(&config(), &source)
      .execute_with_outcome(request)
      .await;

    assert_eq!(outcome, PipelineOutcome::Rejected);
  }

  #[tokio::test]
  async fn batch_over_limit_short_circuits() {
    let mut config = config();
    config.validation.max_batch = RuleConfig::new(2);
    // would fail validation as well if it ran
    config.validation.max_depth = RuleConfig::new(1);
    let source = MockedSourceRuntime::with_data(json!({}));

    let response = pipeline(&config, &source)
      .execute(post(json!([
        { "query": "{ a { b } }" },
        { "query": "{ a { b } }" },
        { "query": "{ a { b } }" }
      ])))
      .await;

    assert_eq!(
      errors(&response),
      vec!["operation has exceeded maximum batch size. found [3], max [2]"]
    );
  }

  #[tokio::test]
  async fn errors_of_every_operation_are_collected() {
    let mut config = config();
    config.validation.max_depth = RuleConfig::new(1);
    let source = MockedSourceRuntime::with_data(json!({}));

    let response = pipeline(&config, &source)
      .execute(post(json!([
        { "query": "{ a { b } }" },
        { "query": "{ ok }" },
        { "query": "{ a {" }
      ])))
      .await;

    let errors = errors(&response);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0], "syntax error: Depth limit of 1 exceeded, found 2");
    assert!(source.received().is_empty());
  }

  #[tokio::test]
  async fn observed_violations_do_not_block() {
    let mut config = config();
    config.validation.max_aliases = RuleConfig::new(1).observe_only();
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = pipeline(&config, &source);

    let (_, outcome) = pipeline
      .execute_with_outcome(post(json!({ "query": "{ a: x b: x c: x }" })))
      .await;

    assert_eq!(outcome, PipelineOutcome::Forwarded);
    let counters = pipeline.validator().rule_counters();
    let (_, aliases) = counters.iter().find(|(name, _)| *name == "max_aliases").unwrap();
    assert_eq!(aliases.failed(), 1);
  }

  #[tokio::test]
  async fn hidden_errors_collapse_into_one() {
    let mut config = config();
    config.validation.max_depth = RuleConfig::new(1);
    config.validation.hide_errors = true;
    let source = MockedSourceRuntime::with_data(json!({}));

    let response = pipeline(&config, &source)
      .execute(post(json!([{ "query": "{ a { b } }" }, { "query": "{ c { d } }" }])))
      .await;

    assert_eq!(errors(&response), vec![REDACTED_ERRORS_MESSAGE]);
  }

  async fn persisted_pipeline(
    config: &mut ShieldConfig,
    source: &MockedSourceRuntime,
    reject_unpersisted: bool,
  ) -> ProtectionPipeline {
    config.persisted_operations.enabled = true;
    config.persisted_operations.reject_on_failure = reject_unpersisted;

    let loader = MemoryLoader::new(HashMap::from([(
      "abc".to_string(),
      "query Stored { a }".to_string(),
    )]));
    let store = Arc::new(
      PersistedOperationsStore::new(
        Arc::new(loader),
        None,
        PersistedOperationsReloadConfig::default(),
      )
      .unwrap(),
    );
    store
      .reload(Default::default())
      .await
      .unwrap();

    ProtectionPipeline::new(
      config,
      Some(store),
      Arc::new(SchemaAwareness::empty()),
      Arc::new(source.clone()),
    )
  }

  #[tokio::test]
  async fn get_request_with_known_hash_is_rewritten_as_post() {
    let mut config = config();
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = persisted_pipeline(&mut config, &source, true).await;

    let extensions = urlencoding::encode(r#"{"persistedQuery":{"sha256Hash":"abc"}}"#);
    let (_, outcome) = pipeline
      .execute_with_outcome(ShieldHttpRequest {
        method: Method::GET,
        query_string: format!("extensions={}&trace=1", extensions),
        body: Default::default(),
        ..Default::default()
      })
      .await;

    assert_eq!(outcome, PipelineOutcome::Forwarded);
    let received = &source.received()[0];
    assert_eq!(received.method, Method::POST);
    assert_eq!(received.query_string, "trace=1");
    let body: Value = received.json_body().unwrap();
    assert_eq!(body, json!({ "query": "query Stored { a }", "operationName": "Stored" }));
  }

  #[tokio::test]
  async fn strict_mode_requires_a_hash() {
    let mut config = config();
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = persisted_pipeline(&mut config, &source, true).await;

    let response = pipeline.execute(post(json!({ "query": "{ a }" }))).await;

    assert_eq!(errors(&response), vec![PERSISTED_QUERY_NOT_FOUND]);
  }

  #[tokio::test]
  async fn resolution_errors_are_not_hidden() {
    let mut config = config();
    config.validation.hide_errors = true;
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = persisted_pipeline(&mut config, &source, true).await;

    let response = pipeline
      .execute(post(json!({
        "extensions": { "persistedQuery": { "sha256Hash": "nope" } }
      })))
      .await;

    assert_eq!(errors(&response), vec![PERSISTED_OPERATION_NOT_FOUND]);
  }

  #[tokio::test]
  async fn missing_operation_text_is_blocking() {
    let source = MockedSourceRuntime::with_data(json!({}));

    let (_, outcome) = pipeline(&config(), &source)
      .execute_with_outcome(post(json!({
        "extensions": { "persistedQuery": { "sha256Hash": "abc" } }
      })))
      .await;

    assert_eq!(outcome, PipelineOutcome::Rejected);
    assert!(source.received().is_empty());
  }

  #[test]
  fn upstream_request_keeps_unrelated_query_params() {
    let source = MockedSourceRuntime::with_data(json!({}));
    let pipeline = pipeline(&config(), &source);
    let mut ctx = RequestExecutionContext::new(
      "id".to_string(),
      ShieldHttpRequest {
        method: Method::GET,
        query_string: "query=x&a=1&operationName=Y".to_string(),
        body: Default::default(),
        ..Default::default()
      },
    );
    ctx.downstream_graphql_batch = Some(GraphQLBatch::Single(Default::default()));
    ctx.rewritten = true;

    let request = pipeline.upstream_request(ctx).unwrap();

    assert_eq!(request.query_string, "a=1");
    assert_eq!(&request.body[..], b"{}");
  }
}
