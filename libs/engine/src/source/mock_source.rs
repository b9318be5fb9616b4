use std::{
  future::Future,
  pin::Pin,
  sync::{Arc, Mutex},
};

use shield_common::{
  graphql::GraphQLResponse,
  http::{ShieldHttpRequest, ShieldHttpResponse},
};

use super::runtime::{SourceError, SourceRuntime};

/// Answers every request with the same response and keeps what it received.
#[derive(Debug, Clone)]
pub struct MockedSourceRuntime {
  pub response: ShieldHttpResponse,
  received: Arc<Mutex<Vec<ShieldHttpRequest>>>,
}

impl MockedSourceRuntime {
  pub fn new(response: ShieldHttpResponse) -> Self {
    Self {
      response,
      received: Default::default(),
    }
  }

  pub fn with_data(data: serde_json::Value) -> Self {
    Self::new(
      GraphQLResponse {
        data: Some(data),
        errors: None,
        extensions: None,
      }
      .into(),
    )
  }

  pub fn received(&self) -> Vec<ShieldHttpRequest> {
    match self.received.lock() {
      Ok(received) => received.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }
}

impl SourceRuntime for MockedSourceRuntime {
  fn forward<'a>(
    &'a self,
    request: ShieldHttpRequest,
  ) -> Pin<Box<dyn Future<Output = Result<ShieldHttpResponse, SourceError>> + Send + 'a>> {
    Box::pin(async move {
      if let Ok(mut received) = self.received.lock() {
        received.push(request);
      }

      Ok(self.response.clone())
    })
  }
}
