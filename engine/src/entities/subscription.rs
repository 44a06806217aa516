use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
  Active,
  Trialing,
  PastDue,
  Canceled,
  Incomplete,
  Unpaid,
}

impl SubscriptionStatus {
  pub fn is_active(self) -> bool {
    matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
  #[serde(rename = "_id")]
  pub id: String,
  pub organization_id: String,
  pub plan_code: String,
  pub status: SubscriptionStatus,
  pub period_start: i64,
  pub period_end: i64,
  pub pool_ram_mb: i64,
  pub pool_cpu_millicores: i64,
  pub pool_bandwidth_gb: i64,
  /// Left as a configuration flag rather than hardcoded per plan; see
  /// DESIGN.md for the open-question resolution.
  pub overage_enabled: bool,
}

/// The resource axes tracked by the scheduler and resource policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceRequest {
  pub ram_mb: i64,
  pub cpu_millicores: i64,
  pub bandwidth_gb: i64,
}
