use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContainerStatus {
  Pending,
  Starting,
  Running,
  Sleeping,
  Stopped,
  Crashed,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SleepStatus {
  Awake,
  Sleeping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
  #[serde(rename = "_id")]
  pub id: String,
  pub project_id: String,
  pub server_id: String,
  pub docker_container_id: String,
  pub image_tag: String,
  pub internal_port: u16,
  pub host_port: u16,
  pub status: ContainerStatus,
  pub sleep_status: SleepStatus,
  pub started_at: Option<i64>,
  pub stopped_at: Option<i64>,
  pub last_request_at: Option<i64>,
}
