//! Container-action consumer (§4.M). Same queue shape as §4.L, for
//! sleep/wake actions on idle containers.

use bson::doc;

use crate::{
  context::SharedEngineContext,
  entities::{ContainerStatus, SleepStatus},
  queue::ContainerAction,
};

pub async fn run(ctx: SharedEngineContext) {
  loop {
    let payload = match ctx.queue.blocking_dequeue_container_action().await {
      Ok(payload) => payload,
      Err(err) => {
        tracing::error!(error = %err, "failed to dequeue container action");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        continue;
      }
    };

    let action: ContainerAction = match serde_json::from_str(&payload) {
      Ok(action) => action,
      Err(err) => {
        tracing::warn!(error = %err, "invalid container action payload");
        continue;
      }
    };

    if let Err(err) = handle(&ctx, action).await {
      tracing::warn!(error = %err, "container action failed");
    }
  }
}

async fn handle(ctx: &SharedEngineContext, action: ContainerAction) -> anyhow::Result<()> {
  match action {
    ContainerAction::Sleep { container_id, runtime_id, deployment_id } => {
      ctx.container_runtime.stop_container(&runtime_id).await?;
      ctx
        .store
        .containers()
        .update_one(
          doc! { "_id": &container_id },
          doc! { "$set": {
            "status": "sleeping",
            "sleepStatus": "sleeping",
            "stoppedAt": ctx.clock.now_millis(),
          }},
        )
        .await?;
      tracing::info!(container_id, "container sleeping");
      ctx.queue.publish_deployment_event(&deployment_id.unwrap_or_default(), "sleeping").await?;
      let _ = (ContainerStatus::Sleeping, SleepStatus::Sleeping);
      Ok(())
    }
    ContainerAction::Wake { container_id, runtime_id, deployment_id } => {
      ctx.container_runtime.start_container(&runtime_id).await?;
      let now = ctx.clock.now_millis();
      ctx
        .store
        .containers()
        .update_one(
          doc! { "_id": &container_id },
          doc! { "$set": {
            "status": "running",
            "sleepStatus": "awake",
            "startedAt": now,
            "lastRequestAt": now,
          }},
        )
        .await?;
      if let Some(deployment_id) = &deployment_id {
        ctx
          .store
          .deployments()
          .update_one(doc! { "_id": deployment_id }, doc! { "$set": { "status": "ready" } })
          .await?;
        ctx.queue.publish_deployment_event(deployment_id, "ready").await?;
      }
      Ok(())
    }
  }
}
