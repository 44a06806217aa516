use serde::{Deserialize, Serialize};

/// Auditing only — the core never branches on these, it just writes
/// them so the (out-of-scope) dashboard can render a history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
  #[serde(rename = "_id")]
  pub id: String,
  pub organization_id: String,
  pub actor_user_id: Option<String>,
  pub action: String,
  pub target: String,
  pub metadata: Option<serde_json::Value>,
  pub created_at: i64,
}

/// Replay protection for inbound webhooks (billing provider, git
/// provider push events). Unique on `event_id`; a duplicate insert is
/// treated as success by the caller (§7 `WebhookDuplicate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
  #[serde(rename = "_id")]
  pub id: String,
  pub event_id: String,
  pub source: String,
  pub received_at: i64,
}
