use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
  #[serde(rename = "_id")]
  pub id: String,
  pub slug: String,
  pub owner_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationInvite {
  #[serde(rename = "_id")]
  pub id: String,
  pub organization_id: String,
  pub invitee_email: String,
  pub inviter_user_id: String,
  pub accepted: bool,
  pub created_at: i64,
}
