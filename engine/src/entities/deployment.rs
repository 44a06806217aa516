use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Environment {
  Production,
  Preview,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
  Queued,
  Building,
  Deploying,
  Ready,
  Failed,
  Canceled,
  RolledBack,
}

impl DeploymentStatus {
  /// Statuses a caller can still cancel out of (§5 Cancellation).
  pub fn is_in_progress(self) -> bool {
    matches!(self, DeploymentStatus::Queued | DeploymentStatus::Building | DeploymentStatus::Deploying)
  }

  pub fn is_terminal(self) -> bool {
    !self.is_in_progress()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentTrigger {
  Manual,
  GithubPush,
  Rollback,
  Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
  #[serde(rename = "_id")]
  pub id: String,
  pub project_id: String,
  pub organization_id: String,
  pub server_id: String,
  pub environment: Environment,
  pub status: DeploymentStatus,
  pub trigger: DeploymentTrigger,
  pub git_url: String,
  pub branch: Option<String>,
  pub commit_sha: Option<String>,
  pub image_tag: Option<String>,
  pub domain: Option<String>,
  pub build_logs: Option<String>,
  pub deploy_logs: Option<String>,
  pub error_message: Option<String>,
  pub capacity_reserved: bool,
  pub created_at: i64,
  pub started_at: Option<i64>,
  pub finished_at: Option<i64>,
  pub container_id: Option<String>,
}

impl Deployment {
  /// §8 property 4: status can only ever move forward through the
  /// state machine in §4.K.
  pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
    use DeploymentStatus::*;
    if self.status == next {
      return false;
    }
    matches!(
      (self.status, next),
      (Queued, Building)
        | (Queued, Failed)
        | (Queued, Canceled)
        | (Building, Deploying)
        | (Building, Failed)
        | (Building, Canceled)
        | (Deploying, Ready)
        | (Deploying, Failed)
        | (Deploying, Canceled)
    )
  }
}
