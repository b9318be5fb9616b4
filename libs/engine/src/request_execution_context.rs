use shield_common::{
  graphql::GraphQLBatch,
  http::{ShieldHttpRequest, ShieldHttpResponse},
};

#[derive(Debug)]
pub struct RequestExecutionContext {
  pub request_id: String,
  pub downstream_http_request: ShieldHttpRequest,
  /// `None` until decoded, and for requests that carry no GraphQL parameters.
  pub downstream_graphql_batch: Option<GraphQLBatch>,
  /// Set once a persisted operation replaced what the client sent.
  pub rewritten: bool,
  pub short_circuit_response: Option<ShieldHttpResponse>,
}

impl RequestExecutionContext {
  pub fn new(request_id: String, downstream_http_request: ShieldHttpRequest) -> Self {
    RequestExecutionContext {
      request_id,
      downstream_http_request,
      downstream_graphql_batch: None,
      rewritten: false,
      short_circuit_response: None,
    }
  }

  pub fn short_circuit(&mut self, response: ShieldHttpResponse) {
    self.short_circuit_response = Some(response);
  }

  pub fn is_short_circuit(&self) -> bool {
    self.short_circuit_response.is_some()
  }

  pub fn take_short_circuit(&mut self) -> Option<ShieldHttpResponse> {
    self.short_circuit_response.take()
  }
}
