//! Apployd deployment-orchestrator engine. See module docs for the
//! component breakdown; `run` wires an `EngineContext` and spawns the
//! background loops that make up the worker process.

pub mod adapters;
pub mod anomaly_detector;
pub mod clock;
pub mod config;
pub mod container_action_consumer;
pub mod context;
pub mod deployment_service;
pub mod domain;
pub mod entities;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod queue_consumer;
pub mod recovery_loop;
pub mod scheduler;
pub mod stats_collector;
pub mod store;

use std::sync::Arc;

use adapters::{
  container_runtime::BollardRuntime, dns::DnsAdapter, edge_router::EdgeRouter,
  host_executor::SystemHostExecutor, tls::TlsAdapter,
};
use clock::system_clock;
use config::Config;
use context::EngineContext;
use metrics::Metrics;
use queue::Queue;
use store::Store;

/// Builds the process-wide `EngineContext` and runs every background
/// loop concurrently until one exits (§5 Scheduling model).
pub async fn run(config: Config) -> anyhow::Result<()> {
  let store = Store::connect(&config.database_url).await?;
  let queue = Queue::connect(&config.redis_url).await?;
  let metrics = Arc::new(Metrics::new()?);

  let host_executor: Arc<dyn adapters::host_executor::HostExecutor> = Arc::new(SystemHostExecutor);
  let container_runtime: Arc<dyn adapters::container_runtime::ContainerRuntime> =
    Arc::new(BollardRuntime::connect()?);
  let edge_router = Arc::new(EdgeRouter::new(config.nginx_sites_path.clone(), host_executor.clone()));
  let tls = TlsAdapter::new(host_executor.clone(), "/etc/letsencrypt/live".to_string());
  let dns = config
    .dns_configured()
    .then(|| DnsAdapter::new(config.cloudflare_api_token.clone().unwrap(), config.cloudflare_zone_id.clone().unwrap()));

  let ctx = Arc::new(EngineContext {
    config,
    store,
    queue,
    clock: system_clock(),
    host_executor,
    container_runtime,
    edge_router,
    tls,
    dns,
    metrics: metrics.clone(),
  });

  let metrics_router = metrics.clone().router();
  let metrics_port = ctx.config.engine_metrics_port;
  let metrics_server = tokio::spawn(async move {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port)).await?;
    axum::serve(listener, metrics_router).await?;
    anyhow::Ok(())
  });

  let queue_consumer = tokio::spawn(queue_consumer::run(ctx.clone()));
  let container_action_consumer = tokio::spawn(container_action_consumer::run(ctx.clone()));
  let stats_collector = tokio::spawn(stats_collector::run(ctx.clone()));
  let recovery_loop = tokio::spawn(recovery_loop::run(ctx.clone()));

  tokio::select! {
    result = queue_consumer => { result?; }
    result = container_action_consumer => { result?; }
    result = stats_collector => { result?; }
    result = recovery_loop => { result?; }
    result = metrics_server => { result??; }
    _ = tokio::signal::ctrl_c() => {
      tracing::info!("received shutdown signal");
    }
  }

  Ok(())
}
