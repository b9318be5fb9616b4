use std::collections::HashMap;

pub use bytes::Bytes;
use http::{HeaderMap, StatusCode as RawStatusCode};
use serde::de::DeserializeOwned;
use serde_json::from_slice;

pub use http::header;
pub use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
pub use http::Method;
pub use mime::{Mime, APPLICATION_JSON};
pub type StatusCode = RawStatusCode;
pub type HttpHeadersMap = HeaderMap<HeaderValue>;

#[derive(Debug, Clone)]
pub struct ShieldHttpRequest {
  pub headers: HttpHeadersMap,
  pub method: Method,
  pub uri: String,
  pub query_string: String,
  pub body: Bytes,
}

#[cfg(feature = "test_utils")]
impl Default for ShieldHttpRequest {
  fn default() -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Self {
      headers,
      method: Method::POST,
      uri: "/graphql".to_string(),
      query_string: "".to_string(),
      body: serde_json::json!({
          "query": "query { __typename }",
      })
      .to_string()
      .into(),
    }
  }
}

impl ShieldHttpRequest {
  pub fn json_body<T>(&self) -> Result<T, serde_json::Error>
  where
    T: DeserializeOwned,
  {
    from_slice::<T>(&self.body)
  }

  pub fn query_params(&self) -> HashMap<String, String> {
    parse_query_string(&self.query_string)
  }
}

#[derive(Debug, Clone)]
pub struct ShieldHttpResponse {
  pub body: Bytes,
  pub status: StatusCode,
  pub headers: HttpHeadersMap,
}

impl ShieldHttpResponse {
  pub fn json_body<T>(&self) -> Result<T, serde_json::Error>
  where
    T: DeserializeOwned,
  {
    from_slice::<T>(&self.body)
  }

  pub fn is_json(&self) -> bool {
    match extract_content_type(&self.headers) {
      Some(content_type) => {
        content_type.subtype() == mime::JSON || content_type.suffix() == Some(mime::JSON)
      }
      None => false,
    }
  }
}

pub fn extract_content_type(headers_map: &HttpHeadersMap) -> Option<Mime> {
  let content_type = headers_map
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .map(ToString::to_string);

  content_type.and_then(|content_type| content_type.parse().ok())
}

/// Splits a raw query string into decoded key/value pairs. Later duplicates win.
pub fn parse_query_string(input: &str) -> HashMap<String, String> {
  querystring::querify(input)
    .iter()
    .filter(|(k, _)| !k.is_empty())
    .map(|(k, v)| {
      let plus_decoded = v.replace('+', " ");
      let value = urlencoding::decode(&plus_decoded)
        .map(|v| v.into_owned())
        .unwrap_or(plus_decoded);

      (k.to_string(), value)
    })
    .collect()
}
