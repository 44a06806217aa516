//! Deployment request service (§4.J). Schedules a server and reserves
//! capacity inside a serializable transaction, then hands the job off
//! to store **B**'s queue.

use std::collections::HashMap;

use bson::doc;

use crate::{
  clock::Clock,
  entities::{Deployment, DeploymentStatus, DeploymentTrigger, Environment, new_id},
  error::EngineError,
  policy::assert_can_allocate,
  queue::{DeploymentJob, DeploymentRequestPayload},
  scheduler::schedule,
  store::Store,
};

pub struct CreateDeploymentRequest {
  pub project_id: String,
  pub trigger: DeploymentTrigger,
  pub environment: Environment,
  pub git_url: String,
  pub branch: Option<String>,
  pub commit_sha: Option<String>,
  pub image_tag: Option<String>,
  /// Overrides for the project's own build/run settings (§6 `request`).
  /// `None`/empty fields fall back to the project's own configuration.
  pub root_directory: Option<String>,
  pub build_command: Option<String>,
  pub start_command: Option<String>,
  pub port: Option<u16>,
  pub output_directory: Option<String>,
  pub env: HashMap<String, String>,
}

pub struct DeploymentRequestService<'a> {
  pub store: &'a Store,
  pub queue: &'a crate::queue::Queue,
  pub clock: &'a dyn Clock,
}

impl<'a> DeploymentRequestService<'a> {
  /// §4.J `create`. Returns the existing deployment id instead of a
  /// new one when a `github_push` trigger collides with an
  /// already-reserved dedupe key (step 6).
  pub async fn create(&self, request: CreateDeploymentRequest) -> Result<String, EngineError> {
    let project = self
      .store
      .projects()
      .find_one(doc! { "_id": &request.project_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or_else(|| EngineError::NotFound(format!("project {}", request.project_id)))?;

    let subscription = self
      .store
      .subscriptions()
      .find_one(doc! { "organizationId": &project.organization_id, "status": { "$in": ["active", "trialing"] } })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or(EngineError::NoActiveSubscription)?;

    if let DeploymentTrigger::GithubPush = request.trigger {
      if let Some(commit_sha) = &request.commit_sha {
        let reserved = self
          .queue
          .reserve_github_push(&project.id, commit_sha)
          .await
          .map_err(EngineError::Other)?;
        if !reserved {
          let existing = self
            .store
            .deployments()
            .find_one(doc! { "projectId": &project.id, "commitSha": commit_sha })
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
          if let Some(existing) = existing {
            return Ok(existing.id);
          }
        }
      }
    }

    let servers: Vec<_> = self
      .store
      .servers()
      .find(doc! {})
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .try_collect_vec()
      .await
      .map_err(|e| EngineError::Other(e.into()))?;

    let resource_request = project.resource_request();
    let selected_server = schedule(&servers, resource_request, None)?;

    let mut session = self.store.start_allocation_session().await.map_err(EngineError::Other)?;

    let deployment_id = new_id();
    let deployment = Deployment {
      id: deployment_id.clone(),
      project_id: project.id.clone(),
      organization_id: project.organization_id.clone(),
      server_id: selected_server.id.clone(),
      environment: request.environment,
      status: DeploymentStatus::Queued,
      trigger: request.trigger,
      git_url: request.git_url.clone(),
      branch: request.branch.clone(),
      commit_sha: request.commit_sha.clone(),
      image_tag: request.image_tag.clone(),
      domain: None,
      build_logs: None,
      deploy_logs: None,
      error_message: None,
      capacity_reserved: false,
      created_at: self.clock.now_millis(),
      started_at: None,
      finished_at: None,
      container_id: None,
    };

    let all_projects: Vec<_> = self
      .store
      .projects()
      .find(doc! { "organizationId": &project.organization_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .try_collect_vec()
      .await
      .map_err(|e| EngineError::Other(e.into()))?;

    assert_can_allocate(&subscription, &all_projects, &project.id, resource_request)?;

    self
      .store
      .deployments()
      .insert_one(&deployment)
      .session(&mut session)
      .await
      .map_err(|e| EngineError::Other(e.into()))?;

    // The previous active deployment's server reservation, if any, is
    // released by the pipeline at promotion time (§4.K steps 8-9), once
    // this deployment has actually succeeded — not here, where a later
    // build/run failure would otherwise leave the old server released
    // and nothing taking its place.
    self
      .store
      .servers()
      .update_one(
        doc! { "_id": &selected_server.id },
        doc! { "$inc": {
          "reservedRamMb": resource_request.ram_mb,
          "reservedCpuMillicores": resource_request.cpu_millicores,
          "reservedBandwidthGb": resource_request.bandwidth_gb,
        }},
      )
      .session(&mut session)
      .await
      .map_err(|e| EngineError::Other(e.into()))?;

    self
      .store
      .deployments()
      .update_one(doc! { "_id": &deployment_id }, doc! { "$set": { "capacityReserved": true } })
      .session(&mut session)
      .await
      .map_err(|e| EngineError::Other(e.into()))?;

    session.commit_transaction().await.map_err(EngineError::Other)?;

    let request_payload = DeploymentRequestPayload {
      git_url: request.git_url.clone(),
      branch: request.branch.clone(),
      commit_sha: request.commit_sha.clone(),
      root_directory: request.root_directory.clone().or_else(|| project.root_directory.clone()),
      env: request.env.clone(),
      build_command: request.build_command.clone().or_else(|| project.build_command.clone()),
      start_command: request.start_command.clone().or_else(|| project.start_command.clone()),
      port: request.port.unwrap_or(project.target_port),
      service_type: project.service_type,
      output_directory: request.output_directory.clone(),
    };

    let job = DeploymentJob {
      deployment_id: deployment_id.clone(),
      organization_id: project.organization_id.clone(),
      project_id: project.id.clone(),
      environment: format!("{:?}", request.environment).to_lowercase(),
      request: request_payload,
    };
    self.queue.enqueue_deployment(&job).await.map_err(EngineError::Other)?;
    self
      .queue
      .publish_deployment_event(&deployment_id, "queued")
      .await
      .map_err(EngineError::Other)?;

    Ok(deployment_id)
  }
}

#[async_trait::async_trait]
trait TryCollectVec<T> {
  async fn try_collect_vec(self) -> Result<Vec<T>, mongodb::error::Error>;
}

#[async_trait::async_trait]
impl<T: serde::de::DeserializeOwned + Unpin + Send + Sync> TryCollectVec<T> for mongodb::Cursor<T> {
  async fn try_collect_vec(mut self) -> Result<Vec<T>, mongodb::error::Error> {
    use futures_util::TryStreamExt;
    let mut out = Vec::new();
    while let Some(item) = self.try_next().await? {
      out.push(item);
    }
    Ok(out)
  }
}
