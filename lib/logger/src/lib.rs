//! Tracing setup for engine binaries. Mirrors the teacher's
//! stdio-or-otlp, plain-or-json logger, trimmed to what the engine
//! actually needs: a level, a format, and an optional collector.

use serde::{Deserialize, Serialize};
use strum::EnumString;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
  Trace,
}

impl Default for LogLevel {
  fn default() -> Self {
    LogLevel::Info
  }
}

impl LogLevel {
  fn as_str(self) -> &'static str {
    match self {
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
  pub level: LogLevel,
  /// Emit newline-delimited JSON instead of the human-readable format.
  pub json: bool,
  pub otlp_endpoint: Option<String>,
  pub otlp_service_name: Option<String>,
}

/// Initialize the global tracing subscriber. Must be called once, at the
/// very start of `main`, before any other component logs.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let filter = EnvFilter::try_new(config.level.as_str())
    .unwrap_or_else(|_| EnvFilter::new("info"));

  let fmt_layer = if config.json {
    tracing_subscriber::fmt::layer()
      .json()
      .with_target(true)
      .boxed()
  } else {
    tracing_subscriber::fmt::layer()
      .with_target(true)
      .boxed()
  };

  let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

  #[cfg(feature = "otlp")]
  {
    if let Some(endpoint) = &config.otlp_endpoint {
      let otlp_layer = otlp::layer(endpoint, config.otlp_service_name.as_deref())?;
      registry.with(otlp_layer).try_init()?;
      return Ok(());
    }
  }

  registry.try_init()?;
  Ok(())
}

use tracing_subscriber::Layer;

trait BoxedLayerExt<S> {
  fn boxed(self) -> Box<dyn Layer<S> + Send + Sync + 'static>;
}

impl<S, L> BoxedLayerExt<S> for L
where
  L: Layer<S> + Send + Sync + 'static,
  S: tracing::Subscriber,
{
  fn boxed(self) -> Box<dyn Layer<S> + Send + Sync + 'static> {
    Box::new(self)
  }
}

#[cfg(feature = "otlp")]
mod otlp {
  use opentelemetry::KeyValue;
  use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
  use tracing_subscriber::Layer;

  pub fn layer<S>(
    endpoint: &str,
    service_name: Option<&str>,
  ) -> anyhow::Result<Box<dyn Layer<S> + Send + Sync + 'static>>
  where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
  {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
      .with_tonic()
      .with_endpoint(endpoint)
      .build()?;

    let resource = Resource::builder()
      .with_attribute(KeyValue::new(
        "service.name",
        service_name.unwrap_or("apployd-engine").to_string(),
      ))
      .build();

    let provider = SdkTracerProvider::builder()
      .with_batch_exporter(exporter)
      .with_resource(resource)
      .build();

    let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, "apployd-engine");
    Ok(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_defaults_to_info() {
    assert_eq!(LogLevel::default().as_str(), "info");
  }
}
