//! Queue consumer (§4.L). Blocking dequeue loop with a per-deployment
//! lock, dispatching into the pipeline and recording metrics.

use std::time::Instant;

use bson::doc;

use crate::{
  context::SharedEngineContext, entities::DeploymentStatus, pipeline::Pipeline, queue::DeploymentJob,
};

pub async fn run(ctx: SharedEngineContext) {
  let heartbeat_ctx = ctx.clone();
  tokio::spawn(async move { heartbeat_loop(heartbeat_ctx).await });

  loop {
    let payload = match ctx.queue.blocking_dequeue_deployment().await {
      Ok(payload) => payload,
      Err(err) => {
        tracing::error!(error = %err, "failed to dequeue deployment job");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        continue;
      }
    };

    let job: DeploymentJob = match serde_json::from_str(&payload) {
      Ok(job) => job,
      Err(err) => {
        tracing::warn!(error = %err, "invalid deployment payload");
        ctx.metrics.deployment_processed_total.with_label_values(&["invalid"]).inc();
        continue;
      }
    };

    process_job(&ctx, job).await;
  }
}

async fn process_job(ctx: &SharedEngineContext, job: DeploymentJob) {
  let acquired = match ctx.queue.acquire_deployment_lock(&job.deployment_id).await {
    Ok(acquired) => acquired,
    Err(err) => {
      tracing::error!(error = %err, deployment_id = %job.deployment_id, "failed to acquire lock");
      return;
    }
  };
  if !acquired {
    ctx.metrics.deployment_processed_total.with_label_values(&["duplicate"]).inc();
    return;
  }

  let start = Instant::now();
  let pipeline = Pipeline {
    store: &ctx.store,
    queue: &ctx.queue,
    clock: ctx.clock.as_ref(),
    config: &ctx.config,
    container_runtime: ctx.container_runtime.as_ref(),
    edge_router: &ctx.edge_router,
    tls: &ctx.tls,
    dns: ctx.dns.as_ref(),
  };

  let status_label = match pipeline.run(&job.deployment_id, &job.request).await {
    Ok(()) => "success",
    Err(err) if err.is_cancellation() => "canceled",
    Err(err) => {
      tracing::warn!(error = %err, deployment_id = %job.deployment_id, "pipeline failed");
      if let Err(mark_err) = mark_failed(ctx, &job.deployment_id, &err.to_string()).await {
        tracing::error!(error = %mark_err, "failed to mark deployment failed");
      }
      "failed"
    }
  };

  ctx.metrics.deployment_processed_total.with_label_values(&[status_label]).inc();
  ctx
    .metrics
    .deployment_duration_seconds
    .with_label_values(&[status_label])
    .observe(start.elapsed().as_secs_f64());

  if let Err(err) = ctx.queue.release_deployment_lock(&job.deployment_id).await {
    tracing::error!(error = %err, "failed to release deployment lock");
  }
}

async fn mark_failed(ctx: &SharedEngineContext, deployment_id: &str, message: &str) -> anyhow::Result<()> {
  ctx
    .store
    .deployments()
    .update_one(
      doc! { "_id": deployment_id },
      doc! { "$set": { "status": "failed", "errorMessage": message } },
    )
    .await?;
  let _ = DeploymentStatus::Failed;
  Ok(())
}

async fn heartbeat_loop(ctx: SharedEngineContext) {
  let pid = std::process::id();
  loop {
    if let Err(err) = ctx.queue.refresh_heartbeat(&ctx.config.engine_region, pid).await {
      tracing::warn!(error = %err, "failed to refresh heartbeat");
    }
    tokio::time::sleep(crate::queue::HEARTBEAT_REFRESH_INTERVAL).await;
  }
}
