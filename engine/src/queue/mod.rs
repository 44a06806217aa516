//! Ephemeral coordination store (§B). Queues, per-deployment locks,
//! pub/sub, and heartbeats, all against Redis — the idiomatic choice
//! for this shape of workload in the broader retrieval pack even
//! though the teacher itself doesn't use Redis directly.

use std::{collections::HashMap, time::Duration};

use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::{Deserialize, Serialize};

use crate::entities::ServiceType;

const DEPLOYMENT_QUEUE_KEY: &str = "deployments:queue";
const CONTAINER_ACTION_QUEUE_KEY: &str = "container-actions:queue";
const DEPLOYMENT_LOCK_TTL_SECONDS: u64 = 900;
const HEARTBEAT_TTL_SECONDS: u64 = 20;
const GITHUB_PUSH_DEDUPE_TTL_SECONDS: u64 = 12 * 60 * 60;

/// The `request` blob inside a deployment job payload (§6): everything
/// the build/run stages need that isn't already on the `Deployment` row
/// itself. Built once by the request service from the caller's input
/// plus the project's own defaults, then carried verbatim through the
/// queue so the pipeline never has to re-derive it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequestPayload {
  pub git_url: String,
  pub branch: Option<String>,
  pub commit_sha: Option<String>,
  pub root_directory: Option<String>,
  #[serde(default)]
  pub env: HashMap<String, String>,
  pub build_command: Option<String>,
  pub start_command: Option<String>,
  pub port: u16,
  pub service_type: ServiceType,
  pub output_directory: Option<String>,
}

impl Default for ServiceType {
  fn default() -> Self {
    ServiceType::WebService
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
  pub deployment_id: String,
  pub organization_id: String,
  pub project_id: String,
  pub environment: String,
  pub request: DeploymentRequestPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ContainerAction {
  #[serde(rename = "sleep")]
  Sleep { container_id: String, runtime_id: String, deployment_id: Option<String> },
  #[serde(rename = "wake")]
  Wake { container_id: String, runtime_id: String, deployment_id: Option<String> },
}

/// Process-wide handle to store **B**, built once in `main`.
#[derive(Clone)]
pub struct Queue {
  manager: ConnectionManager,
}

impl Queue {
  pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    Ok(Self { manager })
  }

  pub async fn enqueue_deployment(&self, job: &DeploymentJob) -> anyhow::Result<()> {
    let payload = serde_json::to_string(job)?;
    let mut conn = self.manager.clone();
    conn.rpush::<_, _, ()>(DEPLOYMENT_QUEUE_KEY, payload).await?;
    Ok(())
  }

  /// Blocking dequeue with no timeout (§4.L step 1). Returns the raw
  /// payload so the caller can mark an unparseable job `failed` before
  /// giving up on it.
  pub async fn blocking_dequeue_deployment(&self) -> anyhow::Result<String> {
    let mut conn = self.manager.clone();
    let (_key, payload): (String, String) = conn.blpop(DEPLOYMENT_QUEUE_KEY, 0.0).await?;
    Ok(payload)
  }

  pub async fn enqueue_container_action(&self, action: &ContainerAction) -> anyhow::Result<()> {
    let payload = serde_json::to_string(action)?;
    let mut conn = self.manager.clone();
    conn.rpush::<_, _, ()>(CONTAINER_ACTION_QUEUE_KEY, payload).await?;
    Ok(())
  }

  pub async fn blocking_dequeue_container_action(&self) -> anyhow::Result<String> {
    let mut conn = self.manager.clone();
    let (_key, payload): (String, String) = conn.blpop(CONTAINER_ACTION_QUEUE_KEY, 0.0).await?;
    Ok(payload)
  }

  /// `SET deployments:lock:<id> NX EX 900`. `Ok(true)` means the lock
  /// was acquired by this call.
  pub async fn acquire_deployment_lock(&self, deployment_id: &str) -> anyhow::Result<bool> {
    let mut conn = self.manager.clone();
    let key = format!("deployments:lock:{deployment_id}");
    let acquired: bool = redis::cmd("SET")
      .arg(&key)
      .arg(1)
      .arg("NX")
      .arg("EX")
      .arg(DEPLOYMENT_LOCK_TTL_SECONDS)
      .query_async(&mut conn)
      .await
      .map(|v: Option<String>| v.is_some())?;
    Ok(acquired)
  }

  pub async fn release_deployment_lock(&self, deployment_id: &str) -> anyhow::Result<()> {
    let mut conn = self.manager.clone();
    let key = format!("deployments:lock:{deployment_id}");
    conn.del::<_, ()>(key).await?;
    Ok(())
  }

  pub async fn publish_deployment_event(
    &self,
    deployment_id: &str,
    event: &str,
  ) -> anyhow::Result<()> {
    let mut conn = self.manager.clone();
    let channel = format!("deployments:{deployment_id}");
    conn.publish::<_, _, ()>(channel, event).await?;
    Ok(())
  }

  pub async fn refresh_heartbeat(&self, region: &str, pid: u32) -> anyhow::Result<()> {
    let mut conn = self.manager.clone();
    let key = format!("engine:heartbeat:{region}:{pid}");
    conn.set_ex::<_, _, ()>(key, 1, HEARTBEAT_TTL_SECONDS).await?;
    Ok(())
  }

  /// `SET NX EX` GitHub push dedupe key (§4.J step 6). `Ok(true)` means
  /// this call reserved the key (i.e. this is not a duplicate push).
  pub async fn reserve_github_push(&self, project_id: &str, commit_sha: &str) -> anyhow::Result<bool> {
    let mut conn = self.manager.clone();
    let key = format!("github:push:{project_id}:{commit_sha}");
    let reserved: bool = redis::cmd("SET")
      .arg(&key)
      .arg(1)
      .arg("NX")
      .arg("EX")
      .arg(GITHUB_PUSH_DEDUPE_TTL_SECONDS)
      .query_async(&mut conn)
      .await
      .map(|v: Option<String>| v.is_some())?;
    Ok(reserved)
  }
}

/// How often the queue consumer refreshes its own heartbeat, well
/// inside the TTL (§4.L step 5).
pub const HEARTBEAT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEPLOYMENT_LOCK_TTL: Duration = Duration::from_secs(DEPLOYMENT_LOCK_TTL_SECONDS);
