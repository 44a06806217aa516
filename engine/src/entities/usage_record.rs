use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricType {
  CpuMillicoreSeconds,
  RamMbSeconds,
  BandwidthBytes,
  RequestCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
  #[serde(rename = "_id")]
  pub id: String,
  pub organization_id: String,
  pub subscription_id: String,
  pub project_id: String,
  pub metric_type: MetricType,
  /// Never negative — see §8 property 6.
  pub quantity: i64,
  pub unit: String,
  pub recorded_at: i64,
}
