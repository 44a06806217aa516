use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::ResourceRequest;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServerStatus {
  Healthy,
  Degraded,
  Draining,
  Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
  #[serde(rename = "_id")]
  pub id: String,
  pub name: String,
  pub region: String,
  pub ipv4: String,
  pub status: ServerStatus,
  pub total_ram_mb: i64,
  pub total_cpu_millicores: i64,
  pub total_bandwidth_gb: i64,
  pub reserved_ram_mb: i64,
  pub reserved_cpu_millicores: i64,
  pub reserved_bandwidth_gb: i64,
  pub max_containers: i64,
  pub created_at: i64,
}

impl Server {
  pub fn available(&self) -> ResourceRequest {
    ResourceRequest {
      ram_mb: self.total_ram_mb - self.reserved_ram_mb,
      cpu_millicores: self.total_cpu_millicores - self.reserved_cpu_millicores,
      bandwidth_gb: self.total_bandwidth_gb - self.reserved_bandwidth_gb,
    }
  }

  pub fn qualifies(&self, request: ResourceRequest) -> bool {
    self.status == ServerStatus::Healthy && {
      let avail = self.available();
      avail.ram_mb >= request.ram_mb
        && avail.cpu_millicores >= request.cpu_millicores
        && avail.bandwidth_gb >= request.bandwidth_gb
    }
  }

  /// §4.H scoring rule: `1.1·availRam + 0.9·availCpu + 0.2·availBandwidth`.
  pub fn score(&self) -> f64 {
    let avail = self.available();
    1.1 * avail.ram_mb as f64 + 0.9 * avail.cpu_millicores as f64 + 0.2 * avail.bandwidth_gb as f64
  }

  /// Invariant check used by tests and the recovery loop: `reserved <= total`
  /// on every axis (§8 property 1).
  pub fn reservation_within_capacity(&self) -> bool {
    self.reserved_ram_mb <= self.total_ram_mb
      && self.reserved_cpu_millicores <= self.total_cpu_millicores
      && self.reserved_bandwidth_gb <= self.total_bandwidth_gb
  }
}
