//! Stats collector (§4.N). Polls container runtime stats every 30 s,
//! attributes them to `(organizationId, subscriptionId, projectId)`
//! via a short-lived ownership cache, and writes `UsageRecord` rows.

use std::{
  collections::HashMap,
  sync::Mutex,
  time::Duration,
};

use bson::doc;

use crate::{context::SharedEngineContext, entities::{MetricType, UsageRecord, new_id}};

const CYCLE_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_DELAY: Duration = Duration::from_secs(5);
const OWNERSHIP_POSITIVE_TTL: Duration = Duration::from_secs(5 * 60);
const MAX_CACHE_ENTRIES: usize = 10_000;
const PLATFORM_RUNTIME_PREFIX: &str = "apployd-";

#[derive(Debug, Clone)]
struct Ownership {
  organization_id: String,
  subscription_id: String,
  project_id: String,
}

struct OwnershipCache {
  entries: Mutex<HashMap<String, (Option<Ownership>, i64)>>,
}

impl OwnershipCache {
  fn new() -> Self {
    Self { entries: Mutex::new(HashMap::new()) }
  }

  fn get(&self, key: &str, now: i64) -> Option<Option<Ownership>> {
    let entries = self.entries.lock().unwrap();
    entries.get(key).and_then(|(value, expires_at)| (*expires_at > now).then(|| value.clone()))
  }

  fn set(&self, key: String, value: Option<Ownership>, now: i64, negative_ttl: Duration) {
    let ttl = if value.is_some() { OWNERSHIP_POSITIVE_TTL } else { negative_ttl };
    let mut entries = self.entries.lock().unwrap();
    entries.insert(key, (value, now + ttl.as_millis() as i64));
    cap_entries(&mut entries);
  }
}

fn cap_entries<V>(map: &mut HashMap<String, V>) {
  if map.len() <= MAX_CACHE_ENTRIES {
    return;
  }
  let overflow = map.len() - MAX_CACHE_ENTRIES;
  let drop_keys: Vec<String> = map.keys().take(overflow).cloned().collect();
  for key in drop_keys {
    map.remove(&key);
  }
}

struct NetworkTotals {
  previous: Mutex<HashMap<String, i64>>,
}

impl NetworkTotals {
  fn new() -> Self {
    Self { previous: Mutex::new(HashMap::new()) }
  }

  fn delta_and_update(&self, runtime_id: &str, total: i64) -> i64 {
    let mut previous = self.previous.lock().unwrap();
    let delta = total - previous.get(runtime_id).copied().unwrap_or(total);
    previous.insert(runtime_id.to_string(), total);
    delta
  }

  fn prune_to_seen(&self, seen: &std::collections::HashSet<String>) {
    let mut previous = self.previous.lock().unwrap();
    previous.retain(|k, _| seen.contains(k));
    cap_entries(&mut previous);
  }
}

#[derive(Debug, Clone)]
pub struct RuntimeSample {
  pub runtime_id: String,
  pub name: String,
  pub cpu_percent: f64,
  pub mem_usage_mb: f64,
  pub net_in_bytes: i64,
  pub net_out_bytes: i64,
}

pub async fn run(ctx: SharedEngineContext) {
  tokio::time::sleep(INITIAL_DELAY).await;
  let ownership_cache = OwnershipCache::new();
  let network_totals = NetworkTotals::new();
  let mut last_cycle_start = ctx.clock.now_millis() - INITIAL_DELAY.as_millis() as i64;
  let running = std::sync::atomic::AtomicBool::new(false);

  loop {
    if running.swap(true, std::sync::atomic::Ordering::SeqCst) {
      tracing::warn!("stats collector cycle still running, skipping this tick");
      tokio::time::sleep(CYCLE_INTERVAL).await;
      continue;
    }

    let now = ctx.clock.now_millis();
    let interval_seconds = ((now - last_cycle_start) / 1000).max(1);
    last_cycle_start = now;

    if let Err(err) =
      run_cycle(&ctx, &ownership_cache, &network_totals, now, interval_seconds).await
    {
      tracing::error!(error = %err, "stats collector cycle failed");
    }

    running.store(false, std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(CYCLE_INTERVAL).await;
  }
}

async fn run_cycle(
  ctx: &SharedEngineContext,
  ownership_cache: &OwnershipCache,
  network_totals: &NetworkTotals,
  now: i64,
  interval_seconds: i64,
) -> anyhow::Result<()> {
  let samples = poll_samples(ctx).await?;
  let mut rows = Vec::new();
  let mut seen_runtime_ids = std::collections::HashSet::new();

  for sample in &samples {
    if !sample.name.starts_with(PLATFORM_RUNTIME_PREFIX) {
      continue;
    }
    seen_runtime_ids.insert(sample.runtime_id.clone());

    let ownership = resolve_ownership(ctx, ownership_cache, &sample.runtime_id, now).await;
    let Some(ownership) = ownership else { continue };

    let millicores = sample.cpu_percent * 10.0;
    let cpu_millicore_seconds = (millicores * interval_seconds as f64).round() as i64;
    if cpu_millicore_seconds > 0 {
      rows.push(usage_row(&ownership, MetricType::CpuMillicoreSeconds, cpu_millicore_seconds, "millicore_seconds", now));
    }

    let ram_mb_seconds = (sample.mem_usage_mb * interval_seconds as f64).round() as i64;
    if ram_mb_seconds > 0 {
      rows.push(usage_row(&ownership, MetricType::RamMbSeconds, ram_mb_seconds, "mb_seconds", now));
    }

    let total_bytes = sample.net_in_bytes + sample.net_out_bytes;
    let delta = network_totals.delta_and_update(&sample.runtime_id, total_bytes);
    if delta > 0 {
      rows.push(usage_row(&ownership, MetricType::BandwidthBytes, delta, "bytes", now));
    }
  }

  if !rows.is_empty() {
    ctx.store.usage_records().insert_many(&rows).await?;
  }
  network_totals.prune_to_seen(&seen_runtime_ids);
  Ok(())
}

fn usage_row(ownership: &Ownership, metric_type: MetricType, quantity: i64, unit: &str, recorded_at: i64) -> UsageRecord {
  UsageRecord {
    id: new_id(),
    organization_id: ownership.organization_id.clone(),
    subscription_id: ownership.subscription_id.clone(),
    project_id: ownership.project_id.clone(),
    metric_type,
    quantity,
    unit: unit.to_string(),
    recorded_at,
  }
}

async fn resolve_ownership(
  ctx: &SharedEngineContext,
  cache: &OwnershipCache,
  runtime_id: &str,
  now: i64,
) -> Option<Ownership> {
  if let Some(cached) = cache.get(runtime_id, now) {
    return cached;
  }

  let container = ctx.store.containers().find_one(doc! { "dockerContainerId": runtime_id }).await.ok().flatten();
  let ownership = match container {
    Some(container) => {
      let project = ctx.store.projects().find_one(doc! { "_id": &container.project_id }).await.ok().flatten();
      match project {
        Some(project) => {
          let subscription = ctx
            .store
            .subscriptions()
            .find_one(doc! { "organizationId": &project.organization_id })
            .await
            .ok()
            .flatten();
          subscription.map(|subscription| Ownership {
            organization_id: project.organization_id.clone(),
            subscription_id: subscription.id,
            project_id: project.id,
          })
        }
        None => None,
      }
    }
    None => None,
  };

  cache.set(runtime_id.to_string(), ownership.clone(), now, CYCLE_INTERVAL);
  ownership
}

async fn poll_samples(ctx: &SharedEngineContext) -> anyhow::Result<Vec<RuntimeSample>> {
  let handles = ctx.container_runtime.list_running(PLATFORM_RUNTIME_PREFIX).await?;
  let mut samples = Vec::with_capacity(handles.len());
  for handle in handles {
    match ctx.container_runtime.stats(&handle.runtime_id).await {
      Ok(stats) => samples.push(sample_from_stats(&handle, &stats)),
      Err(err) => {
        tracing::warn!(error = %err, runtime_id = %handle.runtime_id, "failed to read container stats");
      }
    }
  }
  Ok(samples)
}

/// Converts one raw Docker stats snapshot into a `RuntimeSample`, using
/// the same CPU-percent derivation as `docker stats` itself: the delta
/// in container CPU time over the delta in system CPU time, scaled by
/// online CPU count.
fn sample_from_stats(handle: &crate::adapters::container_runtime::RuntimeHandle, stats: &bollard::container::Stats) -> RuntimeSample {
  let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
    - stats.precpu_stats.cpu_usage.total_usage as f64;
  let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
    - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
  let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
  let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
    (cpu_delta / system_delta) * online_cpus * 100.0
  } else {
    0.0
  };

  let mem_usage_mb = stats.memory_stats.usage.unwrap_or(0) as f64 / (1024.0 * 1024.0);

  let (net_in_bytes, net_out_bytes) = stats
    .networks
    .as_ref()
    .map(|networks| {
      networks.values().fold((0i64, 0i64), |(rx, tx), n| {
        (rx + n.rx_bytes as i64, tx + n.tx_bytes as i64)
      })
    })
    .unwrap_or((0, 0));

  RuntimeSample {
    runtime_id: handle.runtime_id.clone(),
    name: handle.name.clone(),
    cpu_percent,
    mem_usage_mb,
    net_in_bytes,
    net_out_bytes,
  }
}
