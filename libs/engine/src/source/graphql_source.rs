use std::{future::Future, pin::Pin};

use reqwest::Client;
use shield_common::http::{ShieldHttpRequest, ShieldHttpResponse};
use shield_config::UpstreamConfig;
use tracing::debug;

use super::runtime::{strip_connection_headers, SourceError, SourceRuntime};

/// Sends accepted requests to the configured GraphQL endpoint, keeping the
/// downstream method, query string and headers.
#[derive(Debug)]
pub struct GraphQLSourceRuntime {
  pub fetcher: Client,
  pub config: UpstreamConfig,
}

impl GraphQLSourceRuntime {
  pub fn new(config: UpstreamConfig) -> Result<Self, SourceError> {
    let fetcher = Client::builder()
      .connect_timeout(config.timeout)
      .timeout(config.timeout)
      .build()
      .map_err(SourceError::ClientError)?;

    Ok(Self { fetcher, config })
  }

  fn upstream_url(&self, query_string: &str) -> String {
    let endpoint = &self.config.endpoint;

    if query_string.is_empty() {
      return endpoint.clone();
    }

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}{}", endpoint, separator, query_string)
  }
}

impl SourceRuntime for GraphQLSourceRuntime {
  #[tracing::instrument(
    level = "debug",
    skip(self, request),
    name = "GraphQLSourceRuntime::forward"
  )]
  fn forward<'a>(
    &'a self,
    request: ShieldHttpRequest,
  ) -> Pin<Box<dyn Future<Output = Result<ShieldHttpResponse, SourceError>> + Send + 'a>> {
    Box::pin(async move {
      let url = self.upstream_url(&request.query_string);
      let mut headers = request.headers;
      strip_connection_headers(&mut headers);

      debug!(
        "going to send upstream request to {:?}, body size: {}",
        url,
        request.body.len()
      );

      let upstream_response = self
        .fetcher
        .request(request.method, url)
        .headers(headers)
        .body(request.body)
        .send()
        .await
        .map_err(SourceError::NetworkError)?;

      let status = upstream_response.status();
      let mut headers = upstream_response.headers().clone();
      strip_connection_headers(&mut headers);
      let body = upstream_response
        .bytes()
        .await
        .map_err(SourceError::NetworkError)?;

      debug!("upstream responded with status {}, body size: {}", status, body.len());

      Ok(ShieldHttpResponse {
        body,
        status,
        headers,
      })
    })
  }
}
