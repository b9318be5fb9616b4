use serde::Serialize;
use shield_common::{graphql::GraphQLBatch, http::ShieldHttpRequest};
use shield_config::AccessLoggingConfig;
use tracing::info;

pub const ACCESS_LOG_TARGET: &str = "access_log";

#[derive(Debug, Serialize, PartialEq)]
pub struct AccessLogRecord<'a> {
  pub request_id: &'a str,
  pub method: &'a str,
  pub path: &'a str,
  pub batch_size: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub operation_names: Option<Vec<Option<&'a str>>>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub headers: Vec<(&'a str, &'a str)>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payload: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessLogger {
  config: AccessLoggingConfig,
}

impl AccessLogger {
  pub fn new(config: AccessLoggingConfig) -> Self {
    Self { config }
  }

  pub fn record<'a>(
    &'a self,
    request_id: &'a str,
    request: &'a ShieldHttpRequest,
    batch: &'a GraphQLBatch,
  ) -> AccessLogRecord<'a> {
    let path = request.uri.split('?').next().unwrap_or_default();
    let operation_names = self.config.include_operation_name.then(|| {
      batch
        .operations()
        .iter()
        .map(|op| op.operation_name.as_deref())
        .collect()
    });
    let headers = self
      .config
      .include_headers
      .iter()
      .filter_map(|name| {
        let value = request.headers.get(name.as_str())?.to_str().ok()?;
        Some((name.as_str(), value))
      })
      .collect();
    let payload = match self.config.include_payload {
      true => Some(String::from_utf8_lossy(&request.body).into_owned())
        .filter(|body| !body.is_empty())
        .or_else(|| Some(request.query_string.clone())),
      false => None,
    };

    AccessLogRecord {
      request_id,
      method: request.method.as_str(),
      path,
      batch_size: batch.len(),
      operation_names,
      headers,
      payload,
    }
  }

  /// Writes one record on the `access_log` target. Never fails the request.
  pub fn log(&self, request_id: &str, request: &ShieldHttpRequest, batch: &GraphQLBatch) {
    if !self.config.enabled {
      return;
    }

    let record = self.record(request_id, request, batch);

    match serde_json::to_string(&record) {
      Ok(line) => info!(target: ACCESS_LOG_TARGET, request_id = record.request_id, "{}", line),
      Err(e) => info!(
        target: ACCESS_LOG_TARGET,
        request_id = record.request_id,
        "failed to serialize access log record: {}",
        e
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use shield_common::{
    graphql::GraphQLRequest,
    http::{HeaderValue, Method},
  };

  use super::*;

  fn request() -> ShieldHttpRequest {
    let mut request = ShieldHttpRequest::default();
    request.uri = "/graphql?x=1".to_string();
    request
      .headers
      .insert("x-client", HeaderValue::from_static("web"));
    request
      .headers
      .insert("authorization", HeaderValue::from_static("secret"));
    request
  }

  #[test]
  fn default_record() {
    let logger = AccessLogger::new(AccessLoggingConfig::default());
    let request = request();
    let mut op = GraphQLRequest::new("query Foo { a }");
    op.operation_name = Some("Foo".to_string());
    let batch = GraphQLBatch::Batch(vec![op, GraphQLRequest::new("{ b }")]);

    let record = logger.record("01H", &request, &batch);

    assert_eq!(record.method, Method::POST.as_str());
    assert_eq!(record.path, "/graphql");
    assert_eq!(record.batch_size, 2);
    assert_eq!(record.operation_names, Some(vec![Some("Foo"), None]));
    assert!(record.headers.is_empty());
    assert!(record.payload.is_none());
  }

  #[test]
  fn only_listed_headers_are_included() {
    let logger = AccessLogger::new(AccessLoggingConfig {
      include_headers: vec!["x-client".to_string(), "x-missing".to_string()],
      include_operation_name: false,
      include_payload: true,
      ..Default::default()
    });
    let request = request();
    let batch = GraphQLBatch::Single(GraphQLRequest::new("{ a }"));

    let record = logger.record("01H", &request, &batch);

    assert_eq!(record.headers, vec![("x-client", "web")]);
    assert!(record.operation_names.is_none());
    assert_eq!(
      record.payload.as_deref(),
      Some(r#"{"query":"query { __typename }"}"#)
    );
  }
}
