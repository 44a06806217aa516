//! Resource policy (§4.I). Pure accounting over an org's projects plus
//! a composable serializable-transaction retry helper, mirroring the
//! teacher's retry-on-write-conflict handling around Mongo transactions
//! (`bin/core/src/resource/server.rs`).

use std::time::Duration;

use rand::Rng;

use crate::{
  entities::{Project, ResourceRequest, Subscription},
  error::EngineError,
};

/// Sums `resource*` across every project in `projects` except
/// `excluding_project_id`, adds `request`, and rejects whichever axis
/// would exceed the subscription's pool.
pub fn assert_can_allocate(
  subscription: &Subscription,
  projects: &[Project],
  excluding_project_id: &str,
  request: ResourceRequest,
) -> Result<(), EngineError> {
  let mut used = ResourceRequest::default();
  for project in projects {
    if project.id == excluding_project_id {
      continue;
    }
    let r = project.resource_request();
    used.ram_mb += r.ram_mb;
    used.cpu_millicores += r.cpu_millicores;
    used.bandwidth_gb += r.bandwidth_gb;
  }

  check_axis(
    "ram_mb",
    used.ram_mb + request.ram_mb,
    subscription.pool_ram_mb,
  )?;
  check_axis(
    "cpu_millicores",
    used.cpu_millicores + request.cpu_millicores,
    subscription.pool_cpu_millicores,
  )?;
  check_axis(
    "bandwidth_gb",
    used.bandwidth_gb + request.bandwidth_gb,
    subscription.pool_bandwidth_gb,
  )?;
  Ok(())
}

fn check_axis(axis: &str, requested_total: i64, pool: i64) -> Result<(), EngineError> {
  if requested_total > pool {
    return Err(EngineError::AllocationRejected {
      axis: axis.to_string(),
      requested: requested_total,
      available: pool,
    });
  }
  Ok(())
}

/// Runs `op` up to `max_attempts` times, retrying only on
/// `RetryableSerializationFailure`, with full-jitter exponential
/// backoff between attempts (§4.I "caller wraps with
/// `withSerializableRetry`").
pub async fn with_serializable_retry<T, F, Fut>(
  max_attempts: u32,
  base_delay: Duration,
  mut op: F,
) -> Result<T, EngineError>
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = Result<T, EngineError>>,
{
  let mut attempt = 0;
  loop {
    attempt += 1;
    match op().await {
      Ok(value) => return Ok(value),
      Err(EngineError::RetryableSerializationFailure) if attempt < max_attempts => {
        let backoff = base_delay * 2u32.pow(attempt - 1);
        let jitter_ms = rand::rng().random_range(0..=backoff.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
      }
      Err(err) => return Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  fn subscription(pool_ram: i64) -> Subscription {
    Subscription {
      id: "sub_1".into(),
      organization_id: "org_1".into(),
      plan_code: "pro".into(),
      status: crate::entities::SubscriptionStatus::Active,
      period_start: 0,
      period_end: 0,
      pool_ram_mb: pool_ram,
      pool_cpu_millicores: 4000,
      pool_bandwidth_gb: 1000,
      overage_enabled: false,
    }
  }

  fn project(id: &str, ram_mb: i64) -> Project {
    Project {
      id: id.into(),
      organization_id: "org_1".into(),
      slug: id.into(),
      git_provider: None,
      repo_url: None,
      branch: "main".into(),
      runtime: "node".into(),
      service_type: crate::entities::ServiceType::WebService,
      install_command: None,
      build_command: None,
      start_command: None,
      root_directory: None,
      target_port: 3000,
      auto_deploy_enabled: true,
      preview_deployments_enabled: true,
      sleep_enabled: false,
      attack_mode_enabled: false,
      resource_ram_mb: ram_mb,
      resource_cpu_millicore: 250,
      resource_bandwidth_gb: 10,
      active_deployment_id: None,
    }
  }

  #[test]
  fn allows_allocation_within_pool() {
    let sub = subscription(1024);
    let projects = vec![project("p1", 256)];
    let request = ResourceRequest { ram_mb: 256, cpu_millicores: 250, bandwidth_gb: 10 };
    assert!(assert_can_allocate(&sub, &projects, "p1", request).is_ok());
  }

  #[test]
  fn rejects_when_pool_exceeded_excluding_self() {
    let sub = subscription(512);
    let projects = vec![project("p1", 256), project("p2", 256)];
    let request = ResourceRequest { ram_mb: 512, cpu_millicores: 250, bandwidth_gb: 10 };
    let err = assert_can_allocate(&sub, &projects, "p1", request).unwrap_err();
    match err {
      EngineError::AllocationRejected { axis, .. } => assert_eq!(axis, "ram_mb"),
      _ => panic!("expected AllocationRejected"),
    }
  }

  #[tokio::test]
  async fn retry_helper_stops_on_non_retryable_error() {
    let attempts = AtomicU32::new(0);
    let result: Result<(), EngineError> = with_serializable_retry(3, Duration::from_millis(1), || {
      attempts.fetch_add(1, Ordering::SeqCst);
      async { Err(EngineError::NotAuthorized) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn retry_helper_retries_serialization_failures_up_to_limit() {
    let attempts = AtomicU32::new(0);
    let result: Result<(), EngineError> = with_serializable_retry(3, Duration::from_millis(1), || {
      attempts.fetch_add(1, Ordering::SeqCst);
      async { Err(EngineError::RetryableSerializationFailure) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn retry_helper_succeeds_after_transient_failures() {
    let attempts = AtomicU32::new(0);
    let result = with_serializable_retry(5, Duration::from_millis(1), || {
      let n = attempts.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(EngineError::RetryableSerializationFailure)
        } else {
          Ok(42)
        }
      }
    })
    .await
    .unwrap();
    assert_eq!(result, 42);
  }
}
