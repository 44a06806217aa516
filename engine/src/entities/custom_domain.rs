use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CustomDomainStatus {
  Pending,
  Active,
  Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDomain {
  #[serde(rename = "_id")]
  pub id: String,
  pub project_id: String,
  /// Globally unique; enforced by a single unique index in the store.
  pub domain: String,
  pub cname_target: String,
  pub verification_token: String,
  pub status: CustomDomainStatus,
}
