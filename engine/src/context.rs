//! Dependency-injected context (§10 ambient stack). Built once in
//! `main`, wrapped in `Arc`, and passed into every loop/service call —
//! the teacher's `OnceLock`-backed globals in `bin/core/src/state.rs`
//! are deliberately not replicated here (Design Notes).

use std::sync::Arc;

use crate::{
  adapters::{
    container_runtime::SharedContainerRuntime, dns::DnsAdapter, edge_router::SharedEdgeRouter,
    host_executor::SharedHostExecutor, tls::TlsAdapter,
  },
  clock::SharedClock,
  config::Config,
  metrics::Metrics,
  queue::Queue,
  store::Store,
};

pub struct EngineContext {
  pub config: Config,
  pub store: Store,
  pub queue: Queue,
  pub clock: SharedClock,
  pub host_executor: SharedHostExecutor,
  pub container_runtime: SharedContainerRuntime,
  pub edge_router: SharedEdgeRouter,
  pub tls: TlsAdapter,
  pub dns: Option<DnsAdapter>,
  pub metrics: Arc<Metrics>,
}

pub type SharedEngineContext = Arc<EngineContext>;
