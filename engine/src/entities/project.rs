use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::ResourceRequest;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceType {
  WebService,
  StaticSite,
  Python,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
  #[serde(rename = "_id")]
  pub id: String,
  pub organization_id: String,
  pub slug: String,
  pub git_provider: Option<String>,
  pub repo_url: Option<String>,
  pub branch: String,
  pub runtime: String,
  pub service_type: ServiceType,
  pub install_command: Option<String>,
  pub build_command: Option<String>,
  pub start_command: Option<String>,
  pub root_directory: Option<String>,
  pub target_port: u16,
  pub auto_deploy_enabled: bool,
  pub preview_deployments_enabled: bool,
  pub sleep_enabled: bool,
  pub attack_mode_enabled: bool,
  pub resource_ram_mb: i64,
  pub resource_cpu_millicore: i64,
  pub resource_bandwidth_gb: i64,
  pub active_deployment_id: Option<String>,
}

impl Project {
  pub fn resource_request(&self) -> ResourceRequest {
    ResourceRequest {
      ram_mb: self.resource_ram_mb,
      cpu_millicores: self.resource_cpu_millicore,
      bandwidth_gb: self.resource_bandwidth_gb,
    }
  }
}
