//! Engine configuration (§6). Env-first, like the teacher's
//! `bin/periphery/src/config.rs`, but trimmed to an explicit schema
//! with defaults and validated ranges, per Design Notes: "an explicit
//! schema with defaults and ranges; fail fast on startup" — no
//! file-based config-merge layer, since that ambient feature has no
//! counterpart in this spec.

use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

fn default_port() -> u16 {
  8120
}
fn default_preview_domain_style() -> String {
  "project".to_string()
}
fn default_region() -> String {
  "default".to_string()
}
fn default_metrics_port() -> u16 {
  9120
}
fn default_health_timeout() -> u64 {
  45
}
fn default_edge_wake_retry_seconds() -> u64 {
  5
}
fn default_email_ttl_minutes() -> u64 {
  10
}
fn default_email_resend_cooldown_seconds() -> u64 {
  60
}
fn default_email_max_attempts() -> u32 {
  5
}

/// Raw shape parsed directly from the process environment. Field names
/// are lowercased snake_case of the `SCREAMING_SNAKE_CASE` vars in §6;
/// `envy` maps between the two automatically.
#[derive(Debug, Deserialize)]
struct RawEnv {
  #[serde(default = "default_port")]
  port: u16,
  api_base_url: Option<String>,
  dashboard_base_url: Option<String>,
  preview_base_domain: String,
  base_domain: String,
  #[serde(default = "default_preview_domain_style")]
  preview_domain_style: String,
  #[serde(default = "default_region")]
  default_region: String,

  database_url: String,
  redis_url: String,

  jwt_secret: String,
  encryption_key: String,

  cloudflare_api_token: Option<String>,
  cloudflare_zone_id: Option<String>,

  nginx_sites_path: String,
  nginx_template_path: Option<String>,
  #[serde(default)]
  edge_wake_enabled: bool,
  edge_wake_token: Option<String>,
  #[serde(default = "default_edge_wake_retry_seconds")]
  edge_wake_retry_seconds: u64,
  control_plane_internal_url: Option<String>,

  #[serde(default = "default_region")]
  engine_region: String,
  #[serde(default = "default_metrics_port")]
  engine_metrics_port: u16,
  #[serde(default = "default_health_timeout")]
  engine_healthcheck_timeout_seconds: u64,
  #[serde(default)]
  engine_local_mode: bool,

  #[serde(default = "default_email_ttl_minutes")]
  email_verification_ttl_minutes: u64,
  #[serde(default = "default_email_resend_cooldown_seconds")]
  email_verification_resend_cooldown_seconds: u64,
  #[serde(default = "default_email_max_attempts")]
  email_verification_max_attempts: u32,

  #[serde(default)]
  log_json: bool,
  log_level: Option<String>,
  log_otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewDomainStyle {
  Project,
  ProjectRef,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub port: u16,
  pub api_base_url: Option<String>,
  pub dashboard_base_url: Option<String>,
  pub preview_base_domain: String,
  pub base_domain: String,
  pub preview_domain_style: PreviewDomainStyle,
  pub default_region: String,

  pub database_url: String,
  pub redis_url: String,

  pub jwt_secret: String,
  pub encryption_key: String,

  pub cloudflare_api_token: Option<String>,
  pub cloudflare_zone_id: Option<String>,

  pub nginx_sites_path: String,
  pub nginx_template_path: Option<String>,
  pub edge_wake_enabled: bool,
  pub edge_wake_token: Option<String>,
  pub edge_wake_retry: Duration,
  pub control_plane_internal_url: Option<String>,

  pub engine_region: String,
  pub engine_metrics_port: u16,
  pub engine_healthcheck_timeout: Duration,
  pub engine_local_mode: bool,

  pub email_verification_ttl: Duration,
  pub email_verification_resend_cooldown: Duration,
  pub email_verification_max_attempts: u32,

  pub log_json: bool,
  pub log_level: String,
  pub log_otlp_endpoint: Option<String>,
}

impl Config {
  /// Parse from the process environment, failing fast with a
  /// descriptive error on any invalid value instead of defaulting
  /// silently (Design Notes' "fail fast on startup").
  pub fn from_env() -> anyhow::Result<Self> {
    dotenvy::dotenv().ok();
    let raw: RawEnv = envy::from_env().context("failed to parse engine environment")?;
    Self::from_raw(raw)
  }

  fn from_raw(raw: RawEnv) -> anyhow::Result<Self> {
    if raw.jwt_secret.len() < 16 {
      bail!("JWT_SECRET must be at least 16 characters");
    }
    if raw.encryption_key.len() < 32 {
      bail!("ENCRYPTION_KEY must be at least 32 characters");
    }
    if !(1..=60).contains(&raw.edge_wake_retry_seconds) {
      bail!("EDGE_WAKE_RETRY_SECONDS must be in 1..=60");
    }
    if !(1..=60).contains(&raw.email_verification_ttl_minutes) {
      bail!("EMAIL_VERIFICATION_TTL_MINUTES must be in 1..=60");
    }
    if !(5..=3600).contains(&raw.email_verification_resend_cooldown_seconds) {
      bail!("EMAIL_VERIFICATION_RESEND_COOLDOWN_SECONDS must be in 5..=3600");
    }
    if !(1..=20).contains(&raw.email_verification_max_attempts) {
      bail!("EMAIL_VERIFICATION_MAX_ATTEMPTS must be in 1..=20");
    }
    let preview_domain_style = match raw.preview_domain_style.as_str() {
      "project" => PreviewDomainStyle::Project,
      "project_ref" => PreviewDomainStyle::ProjectRef,
      other => bail!("PREVIEW_DOMAIN_STYLE must be 'project' or 'project_ref', got {other:?}"),
    };

    if raw.cloudflare_api_token.is_some() != raw.cloudflare_zone_id.is_some() {
      bail!("CLOUDFLARE_API_TOKEN and CLOUDFLARE_ZONE_ID must both be set or both absent");
    }

    Ok(Config {
      port: raw.port,
      api_base_url: raw.api_base_url,
      dashboard_base_url: raw.dashboard_base_url,
      preview_base_domain: raw.preview_base_domain,
      base_domain: raw.base_domain,
      preview_domain_style,
      default_region: raw.default_region,

      database_url: raw.database_url,
      redis_url: raw.redis_url,

      jwt_secret: raw.jwt_secret,
      encryption_key: raw.encryption_key,

      cloudflare_api_token: raw.cloudflare_api_token,
      cloudflare_zone_id: raw.cloudflare_zone_id,

      nginx_sites_path: raw.nginx_sites_path,
      nginx_template_path: raw.nginx_template_path,
      edge_wake_enabled: raw.edge_wake_enabled,
      edge_wake_token: raw.edge_wake_token,
      edge_wake_retry: Duration::from_secs(raw.edge_wake_retry_seconds),
      control_plane_internal_url: raw.control_plane_internal_url,

      engine_region: raw.engine_region,
      engine_metrics_port: raw.engine_metrics_port,
      engine_healthcheck_timeout: Duration::from_secs(raw.engine_healthcheck_timeout_seconds),
      engine_local_mode: raw.engine_local_mode,

      email_verification_ttl: Duration::from_secs(raw.email_verification_ttl_minutes * 60),
      email_verification_resend_cooldown: Duration::from_secs(
        raw.email_verification_resend_cooldown_seconds,
      ),
      email_verification_max_attempts: raw.email_verification_max_attempts,

      log_json: raw.log_json,
      log_level: raw.log_level.unwrap_or_else(|| "info".to_string()),
      log_otlp_endpoint: raw.log_otlp_endpoint,
    })
  }

  /// DNS stage is skipped entirely when provider credentials are absent
  /// (§4.G).
  pub fn dns_configured(&self) -> bool {
    self.cloudflare_api_token.is_some()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_raw() -> RawEnv {
    RawEnv {
      port: 8120,
      api_base_url: None,
      dashboard_base_url: None,
      preview_base_domain: "preview.apployd.app".into(),
      base_domain: "apployd.app".into(),
      preview_domain_style: "project".into(),
      default_region: "us-east".into(),
      database_url: "mongodb://localhost/apployd".into(),
      redis_url: "redis://localhost".into(),
      jwt_secret: "0123456789abcdef".into(),
      encryption_key: "0123456789abcdef0123456789abcdef".into(),
      cloudflare_api_token: None,
      cloudflare_zone_id: None,
      nginx_sites_path: "/etc/nginx/sites-enabled".into(),
      nginx_template_path: None,
      edge_wake_enabled: false,
      edge_wake_token: None,
      edge_wake_retry_seconds: 5,
      control_plane_internal_url: None,
      engine_region: "us-east".into(),
      engine_metrics_port: 9120,
      engine_healthcheck_timeout_seconds: 45,
      engine_local_mode: false,
      email_verification_ttl_minutes: 10,
      email_verification_resend_cooldown_seconds: 60,
      email_verification_max_attempts: 5,
      log_json: false,
      log_level: None,
      log_otlp_endpoint: None,
    }
  }

  #[test]
  fn rejects_short_jwt_secret() {
    let mut raw = base_raw();
    raw.jwt_secret = "short".into();
    assert!(Config::from_raw(raw).is_err());
  }

  #[test]
  fn rejects_mismatched_dns_credentials() {
    let mut raw = base_raw();
    raw.cloudflare_api_token = Some("token".into());
    assert!(Config::from_raw(raw).is_err());
  }

  #[test]
  fn accepts_valid_config() {
    let config = Config::from_raw(base_raw()).unwrap();
    assert_eq!(config.preview_domain_style, PreviewDomainStyle::Project);
    assert!(!config.dns_configured());
  }
}
