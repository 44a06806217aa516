//! Recovery loop (§4.O). Ensures active containers exist and are
//! running; restarts or marks crashed.

use std::time::Duration;

use bson::doc;
use futures_util::TryStreamExt;

use crate::{context::SharedEngineContext, entities::ContainerStatus};

const CYCLE_INTERVAL: Duration = Duration::from_secs(60);
const INITIAL_DELAY: Duration = Duration::from_secs(10);
const MAX_PROJECTS_PER_CYCLE: i64 = 5_000;

pub async fn run(ctx: SharedEngineContext) {
  tokio::time::sleep(INITIAL_DELAY).await;
  let running = std::sync::atomic::AtomicBool::new(false);

  loop {
    if !running.swap(true, std::sync::atomic::Ordering::SeqCst) {
      if let Err(err) = run_cycle(&ctx).await {
        tracing::error!(error = %err, "recovery loop cycle failed");
      }
      running.store(false, std::sync::atomic::Ordering::SeqCst);
    } else {
      tracing::warn!("recovery loop cycle still running, skipping this tick");
    }
    tokio::time::sleep(CYCLE_INTERVAL).await;
  }
}

async fn run_cycle(ctx: &SharedEngineContext) -> anyhow::Result<()> {
  let mut cursor = ctx
    .store
    .projects()
    .find(doc! { "activeDeploymentId": { "$exists": true, "$ne": bson::Bson::Null } })
    .limit(MAX_PROJECTS_PER_CYCLE)
    .await?;

  while let Some(project) = cursor.try_next().await? {
    let Some(deployment_id) = &project.active_deployment_id else { continue };
    let deployment = ctx.store.deployments().find_one(doc! { "_id": deployment_id }).await?;
    let Some(deployment) = deployment else { continue };
    let Some(container_id) = &deployment.container_id else { continue };
    let container = ctx.store.containers().find_one(doc! { "_id": container_id }).await?;
    let Some(container) = container else { continue };

    if let Err(err) = ctx.container_runtime.set_restart_policy(&container.docker_container_id, "unless-stopped").await {
      tracing::warn!(error = %err, container_id = %container.id, "failed to enforce restart policy");
    }

    let state = ctx.container_runtime.get_container_runtime_state(&container.docker_container_id).await?;
    match state {
      None => mark_crashed(ctx, &container.id).await?,
      Some(state) if state.running => mark_running(ctx, &container.id).await?,
      Some(_) => {
        ctx.container_runtime.start_container(&container.docker_container_id).await?;
        let no_op = |_line: &str| {};
        let healthy = ctx
          .container_runtime
          .health_check(container.host_port, Some(&container.docker_container_id), &no_op)
          .await
          .unwrap_or(false);
        if healthy {
          mark_running(ctx, &container.id).await?;
          tracing::info!(container_id = %container.id, "Recovered active container");
        } else {
          mark_crashed(ctx, &container.id).await?;
        }
      }
    }
  }
  Ok(())
}

async fn mark_running(ctx: &SharedEngineContext, container_id: &str) -> anyhow::Result<()> {
  ctx
    .store
    .containers()
    .update_one(
      doc! { "_id": container_id },
      doc! { "$set": { "status": "running", "sleepStatus": "awake" } },
    )
    .await?;
  let _ = ContainerStatus::Running;
  Ok(())
}

async fn mark_crashed(ctx: &SharedEngineContext, container_id: &str) -> anyhow::Result<()> {
  ctx
    .store
    .containers()
    .update_one(doc! { "_id": container_id }, doc! { "$set": { "status": "crashed" } })
    .await?;
  Ok(())
}
