//! Anomaly detector (§4.P). Pure windowing/scoring logic over
//! `UsageRecord` rows already loaded by the caller, so it is testable
//! with fixed fixtures per §8.

use std::collections::HashMap;

use crate::entities::{MetricType, UsageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone)]
pub struct AnomalyReport {
  pub project_id: String,
  pub risk_score: f64,
  pub severity: Severity,
  pub ddos_suspected: bool,
  pub abuse_suspected: bool,
  pub recommend_attack_mode: bool,
  pub note: Option<String>,
}

pub struct DetectRequest<'a> {
  pub organization_id: String,
  pub project_ids: &'a [String],
  pub window_minutes: u32,
  pub baseline_minutes: u32,
  pub now_millis: i64,
  pub records: &'a [UsageRecord],
}

/// `detect` in §4.P: buckets records per project into one current
/// window and N baseline windows, derives spike ratios and the risk
/// score, and returns reports sorted by risk descending.
pub fn detect(request: DetectRequest) -> Vec<AnomalyReport> {
  let window_minutes = request.window_minutes.clamp(1, 30);
  let baseline_minutes = request.baseline_minutes.clamp(15, 1440).max(window_minutes * 6);
  let window_ms = window_minutes as i64 * 60_000;
  let baseline_ms = baseline_minutes as i64 * 60_000;
  let bucket_count = (baseline_minutes / window_minutes).max(1);

  let mut by_project: HashMap<&str, Vec<&UsageRecord>> = HashMap::new();
  for record in request.records {
    by_project.entry(record.project_id.as_str()).or_default().push(record);
  }

  let mut reports: Vec<AnomalyReport> = request
    .project_ids
    .iter()
    .map(|project_id| {
      let records = by_project.get(project_id.as_str());
      match records {
        None => AnomalyReport {
          project_id: project_id.clone(),
          risk_score: 0.0,
          severity: Severity::Low,
          ddos_suspected: false,
          abuse_suspected: false,
          recommend_attack_mode: false,
          note: Some("No data available".to_string()),
        },
        Some(records) => build_report(
          project_id,
          records,
          request.now_millis,
          window_ms,
          baseline_ms,
          bucket_count,
          window_minutes,
        ),
      }
    })
    .collect();

  reports.sort_by(|a, b| b.risk_score.partial_cmp(&a.risk_score).unwrap_or(std::cmp::Ordering::Equal));
  reports
}

fn build_report(
  project_id: &str,
  records: &[&UsageRecord],
  now_millis: i64,
  window_ms: i64,
  baseline_ms: i64,
  bucket_count: u32,
  window_minutes: u32,
) -> AnomalyReport {
  let current_start = now_millis - window_ms;
  let baseline_start = current_start - baseline_ms;

  let mut current_bandwidth: i64 = 0;
  let mut current_cpu: i64 = 0;
  let mut baseline_buckets_bandwidth = vec![0i64; bucket_count as usize];
  let mut baseline_buckets_cpu = vec![0i64; bucket_count as usize];

  for record in records {
    if record.recorded_at < baseline_start || record.recorded_at > now_millis {
      continue;
    }
    if record.recorded_at >= current_start {
      match record.metric_type {
        MetricType::BandwidthBytes => current_bandwidth += record.quantity,
        MetricType::CpuMillicoreSeconds => current_cpu += record.quantity,
        _ => {}
      }
      continue;
    }
    let offset = current_start - record.recorded_at;
    let bucket = ((offset - 1) / window_ms.max(1)) as usize;
    if bucket >= bucket_count as usize {
      continue;
    }
    match record.metric_type {
      MetricType::BandwidthBytes => baseline_buckets_bandwidth[bucket] += record.quantity,
      MetricType::CpuMillicoreSeconds => baseline_buckets_cpu[bucket] += record.quantity,
      _ => {}
    }
  }

  let baseline_bandwidth_avg = mean(&baseline_buckets_bandwidth);
  let baseline_cpu_avg = mean(&baseline_buckets_cpu);

  let bandwidth_spike_ratio = current_bandwidth as f64 / baseline_bandwidth_avg.max(1.0);
  let cpu_spike_ratio = current_cpu as f64 / baseline_cpu_avg.max(1.0);

  let window_seconds = (window_minutes as f64) * 60.0;
  let current_bandwidth_mbps = current_bandwidth as f64 * 8.0 / window_seconds / 1e6;
  let current_cpu_millicores_avg = current_cpu as f64 / window_seconds;

  let ddos_suspected = current_bandwidth as f64 >= 250.0 * 1024.0 * 1024.0 && bandwidth_spike_ratio >= 2.5;
  let abuse_suspected =
    current_cpu_millicores_avg >= 800.0 && cpu_spike_ratio >= 2.5 && bandwidth_spike_ratio >= 1.4;

  let risk_score = clamp((bandwidth_spike_ratio - 1.0) * 14.0, 0.0, 40.0)
    + clamp(current_bandwidth_mbps * 1.6, 0.0, 20.0)
    + clamp((cpu_spike_ratio - 1.0) * 10.0, 0.0, 25.0)
    + clamp((current_cpu_millicores_avg - 200.0) / 40.0, 0.0, 15.0)
    + if ddos_suspected { 15.0 } else { 0.0 }
    + if abuse_suspected { 10.0 } else { 0.0 };
  let risk_score = clamp(risk_score, 0.0, 100.0).round();

  let severity = if risk_score >= 80.0 {
    Severity::Critical
  } else if risk_score >= 60.0 {
    Severity::High
  } else if risk_score >= 35.0 {
    Severity::Medium
  } else {
    Severity::Low
  };

  AnomalyReport {
    project_id: project_id.to_string(),
    risk_score,
    severity,
    ddos_suspected,
    abuse_suspected,
    recommend_attack_mode: severity >= Severity::High || ddos_suspected || abuse_suspected,
    note: None,
  }
}

fn mean(values: &[i64]) -> f64 {
  if values.is_empty() {
    return 0.0;
  }
  values.iter().sum::<i64>() as f64 / values.len() as f64
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
  value.max(min).min(max)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(project_id: &str, metric: MetricType, quantity: i64, recorded_at: i64) -> UsageRecord {
    UsageRecord {
      id: crate::entities::new_id(),
      organization_id: "org_1".into(),
      subscription_id: "sub_1".into(),
      project_id: project_id.into(),
      metric_type: metric,
      quantity,
      unit: "bytes".into(),
      recorded_at,
    }
  }

  #[test]
  fn absent_project_gets_low_severity_zero_score() {
    let reports = detect(DetectRequest {
      organization_id: "org_1".into(),
      project_ids: &["p1".to_string()],
      window_minutes: 5,
      baseline_minutes: 120,
      now_millis: 10_000_000,
      records: &[],
    });
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].risk_score, 0.0);
    assert_eq!(reports[0].severity, Severity::Low);
    assert_eq!(reports[0].note.as_deref(), Some("No data available"));
  }

  #[test]
  fn bandwidth_spike_flags_ddos_suspected() {
    let now = 10_000_000_000i64;
    let window_ms = 5 * 60_000;
    let mut records = Vec::new();
    // Baseline: small, steady bandwidth across the window before current.
    for i in 1..=24 {
      records.push(record(
        "p1",
        MetricType::BandwidthBytes,
        1_000_000,
        now - window_ms - i * window_ms,
      ));
    }
    // Current window: a massive spike.
    records.push(record("p1", MetricType::BandwidthBytes, 400 * 1024 * 1024, now - 1000));

    let reports = detect(DetectRequest {
      organization_id: "org_1".into(),
      project_ids: &["p1".to_string()],
      window_minutes: 5,
      baseline_minutes: 120,
      now_millis: now,
      records: &records,
    });
    assert!(reports[0].ddos_suspected);
    assert!(reports[0].recommend_attack_mode);
  }

  #[test]
  fn risk_score_is_clamped_to_100() {
    let now = 10_000_000_000i64;
    let window_ms = 5 * 60_000;
    let mut records = Vec::new();
    for i in 1..=24 {
      records.push(record("p1", MetricType::BandwidthBytes, 1, now - window_ms - i * window_ms));
      records.push(record("p1", MetricType::CpuMillicoreSeconds, 1, now - window_ms - i * window_ms));
    }
    records.push(record("p1", MetricType::BandwidthBytes, 10_000 * 1024 * 1024, now - 1000));
    records.push(record("p1", MetricType::CpuMillicoreSeconds, 1_000_000, now - 1000));

    let reports = detect(DetectRequest {
      organization_id: "org_1".into(),
      project_ids: &["p1".to_string()],
      window_minutes: 5,
      baseline_minutes: 120,
      now_millis: now,
      records: &records,
    });
    assert!(reports[0].risk_score <= 100.0);
    assert_eq!(reports[0].severity, Severity::Critical);
  }
}
