//! Deployment pipeline (§4.K). Exactly one instance runs per
//! `deploymentId` at a time (lock held by the queue consumer, §4.L).
//! Every stage transition is persisted and re-checks cancellation
//! before proceeding; adapters are reached through traits so tests
//! drive the whole state machine against fakes.

use bson::doc;

use crate::{
  adapters::{
    container_runtime::{BuildImageSpec, ContainerRuntime, RunContainerSpec},
    edge_router::{EdgeRouter, ProbeMode, ProxyConfig, UpstreamScheme},
    tls::TlsAdapter,
  },
  clock::Clock,
  config::Config,
  domain,
  entities::{Container, ContainerStatus, Deployment, DeploymentStatus, Environment, SleepStatus, new_id},
  error::EngineError,
  queue::{DeploymentRequestPayload, Queue},
  store::Store,
};

const ERROR_LINE_PATTERN: &str =
  r"^(Error:|TypeError:|ReferenceError:|SyntaxError:|\s+throw )|^\s+- property";

pub struct Pipeline<'a> {
  pub store: &'a Store,
  pub queue: &'a Queue,
  pub clock: &'a dyn Clock,
  pub config: &'a Config,
  pub container_runtime: &'a dyn ContainerRuntime,
  pub edge_router: &'a EdgeRouter,
  pub tls: &'a TlsAdapter,
  pub dns: Option<&'a crate::adapters::dns::DnsAdapter>,
}

impl<'a> Pipeline<'a> {
  /// Runs one deployment end-to-end. Any `EngineError::DeploymentCanceled`
  /// returned here is a graceful stop, not a pipeline failure (§4.K
  /// Cancellation, §7 Propagation).
  pub async fn run(
    &self,
    deployment_id: &str,
    request: &DeploymentRequestPayload,
  ) -> Result<(), EngineError> {
    let mut deployment = self.load(deployment_id).await?;
    self.guard_cancellation(&deployment).await?;

    self.transition(&mut deployment, DeploymentStatus::Building).await?;
    self
      .publish_log(deployment_id, &format!("Deploy request {}", deployment.branch.clone().unwrap_or_else(|| "commit".into())))
      .await;

    let result = self.run_stages(&mut deployment, request).await;

    match result {
      Ok(()) => {
        self.transition(&mut deployment, DeploymentStatus::Ready).await?;
        deployment.finished_at = Some(self.clock.now_millis());
        self.persist(&deployment).await?;
        self.queue.publish_deployment_event(deployment_id, "ready").await.map_err(EngineError::Other)?;
        Ok(())
      }
      Err(err) if err.is_cancellation() => Err(err),
      Err(err) => {
        self.fail(&mut deployment, &err).await?;
        Err(err)
      }
    }
  }

  async fn run_stages(
    &self,
    deployment: &mut Deployment,
    request: &DeploymentRequestPayload,
  ) -> Result<(), EngineError> {
    self.guard_cancellation(deployment).await?;
    let built = self.build_stage(deployment, request).await?;
    deployment.image_tag = Some(built.image_tag.clone());
    if let Some(commit_sha) = (!built.source_commit_sha.is_empty()).then_some(built.source_commit_sha) {
      deployment.commit_sha = Some(commit_sha);
    }
    self.persist(deployment).await?;

    self.transition(deployment, DeploymentStatus::Deploying).await?;
    self.guard_cancellation(deployment).await?;

    let running = self.run_stage(deployment, request).await?;
    self.guard_cancellation(deployment).await?;

    self.probe_stage(deployment, &running).await?;

    if !self.config.engine_local_mode {
      self.route_stage(deployment, &running).await?;
    }

    let container_id = self.insert_container_row(deployment, &running, request).await?;
    deployment.container_id = Some(container_id);

    if matches!(deployment.environment, Environment::Production) {
      self.promote(deployment).await?;
    }

    Ok(())
  }

  async fn build_stage(
    &self,
    deployment: &Deployment,
    request: &DeploymentRequestPayload,
  ) -> Result<crate::adapters::container_runtime::BuiltImage, EngineError> {
    if let Some(existing_tag) = &deployment.image_tag {
      // Rollback path: reuse the prior image, no rebuild (§4.K Rollback).
      return Ok(crate::adapters::container_runtime::BuiltImage {
        image_tag: existing_tag.clone(),
        source_commit_sha: deployment.commit_sha.clone().unwrap_or_default(),
      });
    }

    let spec = BuildImageSpec {
      deployment_id: deployment.id.clone(),
      project_id: deployment.project_id.clone(),
      git_url: deployment.git_url.clone(),
      branch: deployment.branch.clone().unwrap_or_default(),
      commit_sha: deployment.commit_sha.clone(),
      root_directory: request.root_directory.clone(),
      build_command: request.build_command.clone(),
      start_command: request.start_command.clone(),
      port: request.port,
      service_type: request.service_type,
      output_directory: request.output_directory.clone(),
    };

    let queue = self.queue;
    let deployment_id = deployment.id.clone();
    let on_log = move |line: &str| {
      let queue = queue.clone();
      let deployment_id = deployment_id.clone();
      let line = line.to_string();
      tokio::spawn(async move {
        let _ = queue.publish_deployment_event(&deployment_id, &line).await;
      });
    };

    retry(2, || self.container_runtime.build_image(spec.clone(), &on_log)).await
  }

  async fn run_stage(
    &self,
    deployment: &Deployment,
    request: &DeploymentRequestPayload,
  ) -> Result<crate::adapters::container_runtime::RunningContainer, EngineError> {
    let resource_request = self.load_resource_request(deployment).await?;
    let spec = RunContainerSpec {
      image_tag: deployment.image_tag.clone().unwrap_or_default(),
      port: request.port,
      env: request.env.clone(),
      memory_mb: resource_request.ram_mb,
      cpu_millicores: resource_request.cpu_millicores,
      deployment_id: deployment.id.clone(),
    };
    let running = retry(1, || self.container_runtime.run_container(spec.clone())).await?;
    self
      .publish_log(&deployment.id, &format!("Container started on port {}", running.host_port))
      .await;
    Ok(running)
  }

  async fn probe_stage(
    &self,
    deployment: &Deployment,
    running: &crate::adapters::container_runtime::RunningContainer,
  ) -> Result<(), EngineError> {
    let no_op = |_line: &str| {};
    let healthy = self
      .container_runtime
      .health_check(running.host_port, Some(&running.runtime_id), &no_op)
      .await?;

    if !healthy {
      let summary = self.container_runtime.get_container_state_summary(&running.runtime_id).await.ok();
      let logs = self.container_runtime.get_container_logs(&running.runtime_id, 40).await.unwrap_or_default();
      let error_message = extract_error_message(&logs).unwrap_or_else(|| {
        summary.map(|s| format!("container unhealthy: {}", s.status)).unwrap_or_else(|| "health check failed".to_string())
      });
      return Err(EngineError::Other(anyhow::anyhow!("Container crashed: {error_message}")));
    }

    let _ = self.container_runtime.set_restart_policy(&running.runtime_id, "unless-stopped").await;
    Ok(())
  }

  async fn route_stage(
    &self,
    deployment: &mut Deployment,
    running: &crate::adapters::container_runtime::RunningContainer,
  ) -> Result<(), EngineError> {
    let domain = match &deployment.domain {
      Some(domain) => domain.clone(),
      None => {
        let computed = domain::production_domain(&deployment.project_id, &deployment.organization_id, &self.config.base_domain);
        deployment.domain = Some(computed.clone());
        computed
      }
    };

    if let Some(dns) = self.dns {
      let server = self.load_server(&deployment.server_id).await?;
      retry(2, || dns.upsert_a_record(&domain, &server.ipv4)).await?;
    }

    retry(2, || {
      self.edge_router.configure_proxy(&ProxyConfig {
        domain: domain.clone(),
        aliases: vec![],
        upstream_host: "127.0.0.1".to_string(),
        upstream_port: running.host_port,
        upstream_scheme: UpstreamScheme::Http,
        attack_mode_enabled: false,
        wake_path: None,
        tls_cert_path: None,
        tls_key_path: None,
      })
    })
    .await?;

    let aliases: Vec<String> = vec![];
    retry(1, || self.tls.ensure_certificate(&domain, &aliases)).await?;

    let timeout = self.config.engine_healthcheck_timeout.as_secs().min(45);
    let readiness = self.edge_router.wait_for_route_ready(&domain, ProbeMode::Https, timeout).await;
    if [0, 502, 503, 504].contains(&readiness.https_status) {
      return Err(EngineError::RouteNotReady(domain));
    }
    Ok(())
  }

  async fn insert_container_row(
    &self,
    deployment: &Deployment,
    running: &crate::adapters::container_runtime::RunningContainer,
    request: &DeploymentRequestPayload,
  ) -> Result<String, EngineError> {
    let container = Container {
      id: new_id(),
      project_id: deployment.project_id.clone(),
      server_id: deployment.server_id.clone(),
      docker_container_id: running.runtime_id.clone(),
      image_tag: deployment.image_tag.clone().unwrap_or_default(),
      internal_port: request.port,
      host_port: running.host_port,
      status: ContainerStatus::Running,
      sleep_status: SleepStatus::Awake,
      started_at: Some(self.clock.now_millis()),
      stopped_at: None,
      last_request_at: Some(self.clock.now_millis()),
    };
    self.store.containers().insert_one(&container).await.map_err(|e| EngineError::Other(e.into()))?;
    Ok(container.id)
  }

  /// Swaps the project's active deployment to this one (§4.K steps
  /// 8-9): releases the previous deployment's server reservation when
  /// it sat on a different server, and stops its container so only one
  /// copy of the project is ever running in production.
  async fn promote(&self, deployment: &Deployment) -> Result<(), EngineError> {
    let project = self
      .store
      .projects()
      .find_one(doc! { "_id": &deployment.project_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or_else(|| EngineError::NotFound(deployment.project_id.clone()))?;

    if let Some(previous_id) = project.active_deployment_id.clone() {
      if previous_id != deployment.id {
        self.rebalance_previous_deployment(&previous_id, deployment, &project).await;
      }
    }

    self
      .store
      .projects()
      .update_one(
        doc! { "_id": &deployment.project_id },
        doc! { "$set": { "activeDeploymentId": &deployment.id } },
      )
      .await
      .map_err(|e| EngineError::Other(e.into()))?;
    Ok(())
  }

  async fn rebalance_previous_deployment(
    &self,
    previous_id: &str,
    deployment: &Deployment,
    project: &crate::entities::Project,
  ) {
    let previous = match self.load(previous_id).await {
      Ok(previous) => previous,
      Err(err) => {
        tracing::warn!(error = %err, deployment_id = %previous_id, "could not load previous deployment for promotion rebalance");
        return;
      }
    };

    if previous.server_id != deployment.server_id {
      let resource_request = project.resource_request();
      if let Err(err) = self
        .store
        .servers()
        .update_one(
          doc! { "_id": &previous.server_id },
          doc! { "$inc": {
            "reservedRamMb": -resource_request.ram_mb,
            "reservedCpuMillicores": -resource_request.cpu_millicores,
            "reservedBandwidthGb": -resource_request.bandwidth_gb,
          }},
        )
        .await
      {
        tracing::warn!(error = %err, server_id = %previous.server_id, "failed to release previous server reservation");
      }
    }

    let Some(container_id) = previous.container_id.clone() else { return };
    let container = self.store.containers().find_one(doc! { "_id": &container_id }).await.ok().flatten();
    let Some(container) = container else { return };

    if let Err(err) = self.container_runtime.stop_container(&container.docker_container_id).await {
      tracing::warn!(error = %err, container_id = %container.id, "failed to stop superseded container");
    }

    if let Err(err) = self
      .store
      .containers()
      .update_one(
        doc! { "_id": &container.id },
        doc! { "$set": { "status": "stopped", "stoppedAt": self.clock.now_millis() } },
      )
      .await
    {
      tracing::warn!(error = %err, container_id = %container.id, "failed to mark superseded container stopped");
    }
  }

  async fn fail(&self, deployment: &mut Deployment, err: &EngineError) -> Result<(), EngineError> {
    deployment.status = DeploymentStatus::Failed;
    deployment.error_message = Some(err.to_string());
    deployment.finished_at = Some(self.clock.now_millis());
    if deployment.capacity_reserved {
      let resource_request = self.load_resource_request(deployment).await;
      if let Ok(resource_request) = resource_request {
        let _ = self
          .store
          .servers()
          .update_one(
            doc! { "_id": &deployment.server_id },
            doc! { "$inc": {
              "reservedRamMb": -resource_request.ram_mb,
              "reservedCpuMillicores": -resource_request.cpu_millicores,
              "reservedBandwidthGb": -resource_request.bandwidth_gb,
            }},
          )
          .await;
      }
      deployment.capacity_reserved = false;
    }
    self.persist(deployment).await?;
    self.queue.publish_deployment_event(&deployment.id, "failed").await.map_err(EngineError::Other)?;
    Ok(())
  }

  async fn load_resource_request(&self, deployment: &Deployment) -> Result<crate::entities::ResourceRequest, EngineError> {
    let project = self
      .store
      .projects()
      .find_one(doc! { "_id": &deployment.project_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or_else(|| EngineError::NotFound(deployment.project_id.clone()))?;
    Ok(project.resource_request())
  }

  async fn load_server(&self, server_id: &str) -> Result<crate::entities::Server, EngineError> {
    self
      .store
      .servers()
      .find_one(doc! { "_id": server_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or_else(|| EngineError::NotFound(server_id.to_string()))
  }

  async fn load(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
    self
      .store
      .deployments()
      .find_one(doc! { "_id": deployment_id })
      .await
      .map_err(|e| EngineError::Other(e.into()))?
      .ok_or_else(|| EngineError::NotFound(deployment_id.to_string()))
  }

  /// Re-reads the row and raises `DeploymentCanceled` if it has moved
  /// to a terminal state out from under the pipeline (§4.K Cancellation,
  /// §5 Cancellation & timeouts).
  async fn guard_cancellation(&self, deployment: &Deployment) -> Result<(), EngineError> {
    let current = self.load(&deployment.id).await?;
    let canceled = matches!(current.status, DeploymentStatus::Canceled)
      || (matches!(current.status, DeploymentStatus::Failed)
        && current.error_message.as_deref().is_some_and(|m| m.contains("canceled by user")));
    if canceled {
      return Err(EngineError::DeploymentCanceled);
    }
    Ok(())
  }

  async fn transition(
    &self,
    deployment: &mut Deployment,
    next: DeploymentStatus,
  ) -> Result<(), EngineError> {
    if !deployment.can_transition_to(next) {
      return Err(EngineError::ValidationFailed(format!(
        "invalid transition {:?} -> {:?}",
        deployment.status, next
      )));
    }
    deployment.status = next;
    if matches!(next, DeploymentStatus::Building) {
      deployment.started_at = Some(self.clock.now_millis());
    }
    tracing::info!(deployment_id = %deployment.id, stage = ?next, status = ?next, "deployment stage transition");
    self.persist(deployment).await
  }

  async fn persist(&self, deployment: &Deployment) -> Result<(), EngineError> {
    self
      .store
      .deployments()
      .replace_one(doc! { "_id": &deployment.id }, deployment)
      .await
      .map_err(|e| EngineError::Other(e.into()))?;
    Ok(())
  }

  async fn publish_log(&self, deployment_id: &str, message: &str) {
    let _ = self.queue.publish_deployment_event(deployment_id, message).await;
  }
}

async fn retry<T, F, Fut>(retries: u32, mut op: F) -> Result<T, EngineError>
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = Result<T, EngineError>>,
{
  let mut attempt = 0;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(err) if err.is_cancellation() => return Err(err),
      Err(err) if attempt < retries => {
        attempt += 1;
        tokio::time::sleep(std::time::Duration::from_millis(2000)).await;
      }
      Err(err) => return Err(err),
    }
  }
}

/// Scans the last lines of container output for the first line
/// matching a known fatal-error shape (§4.K Probe stage).
fn extract_error_message(logs: &[String]) -> Option<String> {
  let re = regex::Regex::new(ERROR_LINE_PATTERN).ok()?;
  logs.iter().find(|line| re.is_match(line)).cloned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_first_matching_error_line() {
    let logs = vec![
      "starting server".to_string(),
      "TypeError: cannot read property of undefined".to_string(),
      "    at foo (index.js:1)".to_string(),
    ];
    assert_eq!(
      extract_error_message(&logs).as_deref(),
      Some("TypeError: cannot read property of undefined")
    );
  }

  #[test]
  fn returns_none_when_no_error_pattern_matches() {
    let logs = vec!["listening on 3000".to_string()];
    assert_eq!(extract_error_message(&logs), None);
  }
}
