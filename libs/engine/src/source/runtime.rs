use std::{fmt::Debug, future::Future, pin::Pin};

use shield_common::{
  graphql::GraphQLResponse,
  http::{header, HttpHeadersMap, ShieldHttpRequest, ShieldHttpResponse, StatusCode},
};

/// The upstream a request is handed to once the pipeline accepts it.
pub trait SourceRuntime: Debug + Send + Sync + 'static {
  fn forward<'a>(
    &'a self,
    request: ShieldHttpRequest,
  ) -> Pin<Box<dyn Future<Output = Result<ShieldHttpResponse, SourceError>> + Send + 'a>>;
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
  #[error("failed to build upstream client: {0}")]
  ClientError(reqwest::Error),
  #[error("network error: {0}")]
  NetworkError(reqwest::Error),
}

impl From<SourceError> for ShieldHttpResponse {
  fn from(_: SourceError) -> Self {
    GraphQLResponse::new_error("failed to reach upstream")
      .into_with_status_code(StatusCode::BAD_GATEWAY)
  }
}

const HOP_BY_HOP_HEADERS: [header::HeaderName; 8] = [
  header::CONNECTION,
  header::PROXY_AUTHENTICATE,
  header::PROXY_AUTHORIZATION,
  header::TE,
  header::TRAILER,
  header::TRANSFER_ENCODING,
  header::UPGRADE,
  header::HOST,
];

/// Removes the headers that describe a single connection, along with
/// `content-length`, which is recomputed for the bytes actually sent.
pub fn strip_connection_headers(headers: &mut HttpHeadersMap) {
  for name in HOP_BY_HOP_HEADERS.iter() {
    headers.remove(name);
  }

  headers.remove("keep-alive");
  headers.remove(header::CONTENT_LENGTH);
}

#[cfg(test)]
mod tests {
  use super::*;
  use shield_common::http::HeaderValue;

  #[test]
  fn connection_headers_are_removed() {
    let mut headers = HttpHeadersMap::new();
    headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));

    strip_connection_headers(&mut headers);

    assert_eq!(headers.len(), 1);
    assert!(headers.contains_key(header::AUTHORIZATION));
  }
}
