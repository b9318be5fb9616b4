use crate::config::LoggerConfigFormat;
use tracing_subscriber::{
  fmt::{self, format::FmtSpan, time::UtcTime},
  EnvFilter, Layer, Registry,
};

pub type BoxedLoggerLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds the formatting layer for the process-wide subscriber.
///
/// `filter` accepts `EnvFilter` directives (`info`, `shield_engine=debug,info`, ...).
/// With `print_performance_info`, span close events are printed along with their timings.
pub fn build_logger(
  format: &LoggerConfigFormat,
  filter: &str,
  print_performance_info: bool,
) -> Result<BoxedLoggerLayer, tracing_subscriber::filter::ParseError> {
  let timer = UtcTime::rfc_3339();
  let filter = EnvFilter::try_new(filter)?;
  let performance_spans = match print_performance_info {
    true => FmtSpan::CLOSE,
    false => FmtSpan::NONE,
  };

  Ok(match format {
    LoggerConfigFormat::Json => fmt::Layer::<Registry>::default()
      .json()
      .with_timer(timer)
      .with_span_events(performance_spans)
      .with_filter(filter)
      .boxed(),
    LoggerConfigFormat::Pretty => fmt::Layer::<Registry>::default()
      .pretty()
      .with_timer(timer)
      .with_span_events(performance_spans)
      .with_filter(filter)
      .boxed(),
    LoggerConfigFormat::Compact => fmt::Layer::<Registry>::default()
      .compact()
      .with_timer(timer)
      .with_span_events(performance_spans)
      .with_filter(filter)
      .boxed(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invalid_filter_is_reported() {
    assert!(build_logger(&LoggerConfigFormat::Compact, "info", false).is_ok());
    assert!(build_logger(&LoggerConfigFormat::Json, "shield_engine=debug,info", true).is_ok());
    assert!(build_logger(&LoggerConfigFormat::Pretty, "shield=notalevel", false).is_err());
  }
}
