//! End-to-end scenarios across the pure-logic components that don't
//! need a live Mongo/Redis/Docker stack: scheduling a deployment onto a
//! server under pool limits, and scanning usage for anomalies. The
//! pipeline/queue-consumer scenarios (E1-E6) drive real store/queue/
//! container-runtime adapters and are exercised via their own in-module
//! fakes instead (see DESIGN.md's Open Question on `poll_samples`).

use apployd_engine::{
  anomaly_detector::{DetectRequest, Severity, detect},
  domain::{self, production_domain},
  entities::{
    MetricType, Project, ResourceRequest, Server, ServerStatus, ServiceType, Subscription,
    SubscriptionStatus, UsageRecord,
  },
  policy,
  scheduler,
};

fn server(id: &str, region: &str, total_ram: i64, reserved_ram: i64) -> Server {
  Server {
    id: id.into(),
    name: id.into(),
    region: region.into(),
    ipv4: "10.0.0.1".into(),
    status: ServerStatus::Healthy,
    total_ram_mb: total_ram,
    total_cpu_millicores: 8000,
    total_bandwidth_gb: 500,
    reserved_ram_mb: reserved_ram,
    reserved_cpu_millicores: 0,
    reserved_bandwidth_gb: 0,
    max_containers: 100,
    created_at: 0,
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
    service_type: ServiceType::WebService,
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

fn subscription(pool_ram_mb: i64) -> Subscription {
  Subscription {
    id: "sub_1".into(),
    organization_id: "org_1".into(),
    plan_code: "pro".into(),
    status: SubscriptionStatus::Active,
    period_start: 0,
    period_end: 0,
    pool_ram_mb,
    pool_cpu_millicores: 8000,
    pool_bandwidth_gb: 500,
    overage_enabled: false,
  }
}

/// A new project's deployment request must both find a qualifying
/// server (§4.H) and fit inside the org's pool alongside every sibling
/// project (§4.I) before a domain can be minted for it (§6).
#[test]
fn schedules_within_pool_then_mints_a_domain() {
  let servers = vec![
    server("eu-1", "eu", 2048, 1800),
    server("us-1", "us", 4096, 512),
  ];
  let request = ResourceRequest { ram_mb: 512, cpu_millicores: 250, bandwidth_gb: 10 };

  let picked = scheduler::schedule(&servers, request, Some("eu")).expect("us-1 should qualify");
  assert_eq!(picked.id, "us-1", "eu-1 lacks free RAM, so fallback to us picks it");

  let sub = subscription(2048);
  let siblings = vec![project("existing", 512)];
  policy::assert_can_allocate(&sub, &siblings, "new-project", request)
    .expect("512 + 512 existing stays under the 2048 pool");

  let domain = production_domain("New Project!", "Acme Inc", "apployd.app");
  assert_eq!(domain, "new-project.acme-inc.apployd.app");
  assert_eq!(domain::verification_txt_name(&domain), format!("_apployd-verify.{domain}"));
}

/// Once the pool is already saturated, scheduling may still succeed
/// (capacity lives on the server) while the policy check must reject
/// the same request — they are independent gates (§4.H vs §4.I).
#[test]
fn scheduler_and_policy_are_independent_gates() {
  let servers = vec![server("us-1", "us", 8192, 0)];
  let request = ResourceRequest { ram_mb: 1024, cpu_millicores: 250, bandwidth_gb: 10 };
  assert!(scheduler::schedule(&servers, request, None).is_ok());

  let sub = subscription(1024);
  let siblings = vec![project("existing", 512)];
  let err = policy::assert_can_allocate(&sub, &siblings, "new-project", request).unwrap_err();
  assert!(matches!(err, apployd_engine::error::EngineError::AllocationRejected { .. }));
}

fn usage_row(project_id: &str, metric_type: MetricType, quantity: i64, recorded_at: i64) -> UsageRecord {
  UsageRecord {
    id: format!("usage_{project_id}_{recorded_at}"),
    organization_id: "org_1".into(),
    subscription_id: "sub_1".into(),
    project_id: project_id.into(),
    metric_type,
    quantity,
    unit: "bytes".into(),
    recorded_at,
  }
}

/// A project whose recent bandwidth dwarfs its own baseline should be
/// flagged well above a quiet sibling project scanned in the same pass.
#[test]
fn flags_spiking_project_above_quiet_sibling_in_same_scan() {
  let window_minutes = 5;
  let baseline_minutes = 60;
  let now = baseline_minutes as i64 * 60_000 + window_minutes as i64 * 60_000;

  let mut records = Vec::new();
  // "quiet" has steady small bandwidth across every bucket, including now.
  for bucket in 0..=(baseline_minutes / window_minutes) {
    let t = bucket as i64 * window_minutes as i64 * 60_000;
    records.push(usage_row("quiet", MetricType::BandwidthBytes, 1_000, t));
  }
  // "spiking" has the same steady baseline, then a huge burst in the
  // current window only.
  for bucket in 0..(baseline_minutes / window_minutes) {
    let t = bucket as i64 * window_minutes as i64 * 60_000;
    records.push(usage_row("spiking", MetricType::BandwidthBytes, 1_000, t));
  }
  records.push(usage_row("spiking", MetricType::BandwidthBytes, 500_000, now - 60_000));

  let project_ids = vec!["quiet".to_string(), "spiking".to_string()];
  let reports = detect(DetectRequest {
    organization_id: "org_1".into(),
    project_ids: &project_ids,
    window_minutes,
    baseline_minutes,
    now_millis: now,
    records: &records,
  });

  assert_eq!(reports.len(), 2);
  // Sorted descending by risk score: the spiking project must lead.
  assert_eq!(reports[0].project_id, "spiking");
  assert!(reports[0].severity >= Severity::Medium, "expected at least Medium, got {:?}", reports[0].severity);
  assert_eq!(reports[1].project_id, "quiet");
  assert_eq!(reports[1].severity, Severity::Low);
}
