//! Prometheus metrics endpoint (§6, §10 ambient stack). Served over a
//! minimal `axum` router, matching the teacher's choice of web
//! framework for every HTTP surface it exposes.

use std::sync::Arc;

use axum::{Router, response::IntoResponse, routing::get};
use prometheus::{Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};

pub struct Metrics {
  registry: Registry,
  pub deployment_processed_total: IntCounterVec,
  pub deployment_duration_seconds: HistogramVec,
}

impl Metrics {
  pub fn new() -> anyhow::Result<Self> {
    let registry = Registry::new();

    let deployment_processed_total = IntCounterVec::new(
      prometheus::Opts::new(
        "deployment_processed_total",
        "Deployments processed by the queue consumer, by terminal status",
      ),
      &["status"],
    )?;
    registry.register(Box::new(deployment_processed_total.clone()))?;

    let deployment_duration_seconds = HistogramVec::new(
      prometheus::HistogramOpts::new(
        "deployment_duration_seconds",
        "Wall-clock time from dequeue to pipeline completion",
      )
      .buckets(vec![1.0, 3.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
      &["status"],
    )?;
    registry.register(Box::new(deployment_duration_seconds.clone()))?;

    #[cfg(target_os = "linux")]
    registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

    Ok(Self { registry, deployment_processed_total, deployment_duration_seconds })
  }

  pub fn router(self: Arc<Self>) -> Router {
    Router::new().route("/metrics", get(move || render(self.clone())))
  }
}

async fn render(metrics: Arc<Metrics>) -> impl IntoResponse {
  let encoder = TextEncoder::new();
  let families = metrics.registry.gather();
  let mut buffer = Vec::new();
  if encoder.encode(&families, &mut buffer).is_err() {
    return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new());
  }
  (axum::http::StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_processed_counter_by_status_label() {
    let metrics = Metrics::new().unwrap();
    metrics.deployment_processed_total.with_label_values(&["success"]).inc();
    metrics.deployment_processed_total.with_label_values(&["failed"]).inc_by(2);
    let families = metrics.registry.gather();
    assert!(families.iter().any(|f| f.get_name() == "deployment_processed_total"));
  }
}
