use crate::entities::ResourceRequest;

/// The named error taxonomy from §7. Adapters and services return
/// `Result<T, EngineError>`; the pipeline converts stage errors into
/// `Deployment.error_message` strings at the boundary instead of
/// unwinding, matching the teacher's `anyhow::Context`-chained errors
/// surfaced at the API edge rather than panicking.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("validation failed: {0}")]
  ValidationFailed(String),

  #[error("not authorized")]
  NotAuthorized,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("organization has no active subscription")]
  NoActiveSubscription,

  #[error("plan limit reached: {0}")]
  PlanLimitReached(String),

  #[error("entitlement missing: {0}")]
  EntitlementMissing(String),

  #[error("no healthy servers available")]
  NoHealthyServers { diagnostics: SchedulerDiagnostics },

  #[error("insufficient capacity")]
  InsufficientCapacity { diagnostics: SchedulerDiagnostics },

  #[error("allocation rejected on {axis}: requested {requested}, available {available}")]
  AllocationRejected { axis: String, requested: i64, available: i64 },

  #[error("retryable serialization failure")]
  RetryableSerializationFailure,

  #[error(transparent)]
  Command(#[from] command::CommandError),

  #[error("health check failed")]
  HealthCheckFailed,

  #[error("edge router config invalid: {0}")]
  EdgeConfigInvalid(String),

  #[error("certificate issuance failed: {0}")]
  CertificateIssuanceFailed(String),

  #[error("route not ready: {0}")]
  RouteNotReady(String),

  #[error("domain already registered: {0}")]
  DomainAlreadyRegistered(String),

  #[error("deployment canceled")]
  DeploymentCanceled,

  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl EngineError {
  /// `DeploymentCanceled` is a graceful stop, never a pipeline failure
  /// (§7 Propagation, §5 Cancellation & timeouts).
  pub fn is_cancellation(&self) -> bool {
    matches!(self, EngineError::DeploymentCanceled)
  }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerDiagnostics {
  pub requested: ResourceRequest,
  pub largest_available: ResourceRequest,
  pub healthy_count: usize,
  pub preferred_region_healthy_count: usize,
}
