use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use shield_common::{
  graphql::GraphQLResponse,
  http::{ShieldHttpResponse, StatusCode},
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BodyLimitError {
  #[error("request body exceeds the maximum of {limit} bytes")]
  TooLarge { limit: usize },
  #[error("failed to read request body: {0}")]
  Read(String),
}

impl From<BodyLimitError> for ShieldHttpResponse {
  fn from(error: BodyLimitError) -> Self {
    match error {
      BodyLimitError::TooLarge { .. } => GraphQLResponse::new_error(&error.to_string()).into(),
      BodyLimitError::Read(_) => GraphQLResponse::new_error(&error.to_string())
        .into_with_status_code(StatusCode::BAD_REQUEST),
    }
  }
}

/// Collects a body stream, failing as soon as more than `limit` bytes arrived.
/// The rest of the stream is never polled.
pub async fn read_body_limited<S, E>(
  mut stream: S,
  limit: Option<usize>,
) -> Result<Bytes, BodyLimitError>
where
  S: Stream<Item = Result<Bytes, E>> + Unpin,
  E: Display,
{
  let mut body = BytesMut::new();

  while let Some(chunk) = stream.next().await {
    let chunk = chunk.map_err(|e| BodyLimitError::Read(e.to_string()))?;

    if let Some(limit) = limit {
      if body.len() + chunk.len() > limit {
        return Err(BodyLimitError::TooLarge { limit });
      }
    }

    body.extend_from_slice(&chunk);
  }

  Ok(body.freeze())
}

/// The same bound for a body that was already read whole.
pub fn check_body_size(body: &Bytes, limit: Option<usize>) -> Result<(), BodyLimitError> {
  match limit {
    Some(limit) if body.len() > limit => Err(BodyLimitError::TooLarge { limit }),
    _ => Ok(()),
  }
}
