use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
  Info,
  Warn,
  Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
  #[serde(rename = "_id")]
  pub id: String,
  pub project_id: String,
  pub deployment_id: Option<String>,
  pub container_id: Option<String>,
  pub level: LogLevel,
  pub source: String,
  pub message: String,
  pub metadata: Option<Value>,
  pub timestamp: i64,
}
