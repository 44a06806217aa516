//! Adapters to the outside world (§4.C–4.G): host commands, the
//! container runtime, the reverse-proxy edge, TLS, and DNS.

pub mod container_runtime;
pub mod dns;
pub mod edge_router;
pub mod host_executor;
pub mod tls;
