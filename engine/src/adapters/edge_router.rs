//! Edge router adapter (§4.E). Renders per-domain reverse-proxy
//! configuration with a strict named-placeholder template engine
//! (`handlebars`, attested elsewhere in the retrieval pack), validates
//! inputs before they ever reach a file on disk, and reloads through
//! the host executor so config-test/reload inherit its timeout and
//! redaction guarantees.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use handlebars::Handlebars;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::{adapters::host_executor::SharedHostExecutor, error::EngineError};

const DOMAIN_CONFIG_TEMPLATE: &str = include_str!("../../templates/site.conf.hbs");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
  Http,
  Https,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
  pub domain: String,
  pub aliases: Vec<String>,
  pub upstream_host: String,
  pub upstream_port: u16,
  pub upstream_scheme: UpstreamScheme,
  pub attack_mode_enabled: bool,
  pub wake_path: Option<String>,
  pub tls_cert_path: Option<String>,
  pub tls_key_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
  Http,
  Https,
  Either,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouteReadiness {
  pub http_status: u16,
  pub https_status: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamReachability {
  pub http_status: u16,
  pub https_status: u16,
  pub tcp_reachable: bool,
}

const UNREADY_STATUSES: [u16; 4] = [0, 502, 503, 504];

pub struct EdgeRouter {
  sites_dir: PathBuf,
  executor: SharedHostExecutor,
  renderer: Handlebars<'static>,
  http_client: reqwest::Client,
}

impl EdgeRouter {
  pub fn new(sites_dir: impl Into<PathBuf>, executor: SharedHostExecutor) -> Self {
    let mut renderer = Handlebars::new();
    renderer.set_strict_mode(true);
    renderer
      .register_template_string("site", DOMAIN_CONFIG_TEMPLATE)
      .expect("bundled site template is valid handlebars");
    Self {
      sites_dir: sites_dir.into(),
      executor,
      renderer,
      http_client: reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .expect("reqwest client builds"),
    }
  }

  fn config_path(&self, domain: &str) -> PathBuf {
    self.sites_dir.join(format!("{domain}.conf"))
  }

  pub async fn configure_proxy(&self, config: &ProxyConfig) -> Result<(), EngineError> {
    validate_domain_label(&config.domain)?;
    for alias in &config.aliases {
      validate_domain_label(alias)?;
    }
    validate_upstream_host(&config.upstream_host)?;
    if config.upstream_port == 0 {
      return Err(EngineError::EdgeConfigInvalid(format!(
        "upstream port out of range: {}",
        config.upstream_port
      )));
    }

    let rendered = self.render(config)?;
    let path = self.config_path(&config.domain);
    let previous = tokio::fs::read_to_string(&path).await.ok();

    tokio::fs::write(&path, &rendered)
      .await
      .map_err(|e| EngineError::EdgeConfigInvalid(format!("writing {path:?}: {e}")))?;

    if let Err(err) = self.test_and_reload().await {
      match previous {
        Some(previous) => {
          let _ = tokio::fs::write(&path, previous).await;
        }
        None => {
          let _ = tokio::fs::remove_file(&path).await;
        }
      }
      return Err(err);
    }
    Ok(())
  }

  async fn test_and_reload(&self) -> Result<(), EngineError> {
    self
      .executor
      .run("nginx config test", "nginx", &["-t"], Duration::from_secs(10), None)
      .await
      .map_err(|_| EngineError::EdgeConfigInvalid("config test failed".to_string()))?;
    self
      .executor
      .run("nginx reload", "nginx", &["-s", "reload"], Duration::from_secs(10), None)
      .await
      .map_err(|_| EngineError::EdgeConfigInvalid("reload failed".to_string()))?;
    Ok(())
  }

  fn render(&self, config: &ProxyConfig) -> Result<String, EngineError> {
    let mut data: HashMap<&str, String> = HashMap::new();
    data.insert("domain", config.domain.clone());
    data.insert("aliases", config.aliases.join(" "));
    data.insert(
      "upstream",
      format!(
        "{}://{}:{}",
        match config.upstream_scheme {
          UpstreamScheme::Http => "http",
          UpstreamScheme::Https => "https",
        },
        config.upstream_host,
        config.upstream_port
      ),
    );
    data.insert("attack_mode", config.attack_mode_enabled.to_string());
    data.insert("rate_limit_zone", rate_limit_zone_name(&config.domain));
    data.insert("wake_path", config.wake_path.clone().unwrap_or_default());
    data.insert("tls_cert_path", config.tls_cert_path.clone().unwrap_or_default());
    data.insert("tls_key_path", config.tls_key_path.clone().unwrap_or_default());

    self
      .renderer
      .render("site", &data)
      .map_err(|e| EngineError::EdgeConfigInvalid(format!("template render failed: {e}")))
  }

  pub async fn wait_for_route_ready(
    &self,
    domain: &str,
    mode: ProbeMode,
    timeout_seconds: u64,
  ) -> RouteReadiness {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
    loop {
      let readiness = self.probe_once(domain, mode).await;
      let ready = match mode {
        ProbeMode::Http => !UNREADY_STATUSES.contains(&readiness.http_status),
        ProbeMode::Https => !UNREADY_STATUSES.contains(&readiness.https_status),
        ProbeMode::Either => {
          !UNREADY_STATUSES.contains(&readiness.http_status)
            || !UNREADY_STATUSES.contains(&readiness.https_status)
        }
      };
      if ready || tokio::time::Instant::now() >= deadline {
        return readiness;
      }
      tokio::time::sleep(Duration::from_secs(1)).await;
    }
  }

  async fn probe_once(&self, domain: &str, mode: ProbeMode) -> RouteReadiness {
    let mut readiness = RouteReadiness::default();
    if matches!(mode, ProbeMode::Http | ProbeMode::Either) {
      readiness.http_status = self.probe_status(&format!("http://{domain}/")).await;
    }
    if matches!(mode, ProbeMode::Https | ProbeMode::Either) {
      readiness.https_status = self.probe_status(&format!("https://{domain}/")).await;
    }
    readiness
  }

  async fn probe_status(&self, url: &str) -> u16 {
    self.http_client.get(url).send().await.map(|r| r.status().as_u16()).unwrap_or(0)
  }

  pub async fn wait_for_upstream_reachable(
    &self,
    host: &str,
    port: u16,
    timeout_seconds: u64,
  ) -> UpstreamReachability {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
    loop {
      let http_status = self.probe_status(&format!("http://{host}:{port}/")).await;
      let https_status = self.probe_status(&format!("https://{host}:{port}/")).await;
      let tcp_reachable = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect((host, port)),
      )
      .await
      .map(|r| r.is_ok())
      .unwrap_or(false);

      if tcp_reachable || tokio::time::Instant::now() >= deadline {
        return UpstreamReachability { http_status, https_status, tcp_reachable };
      }
      tokio::time::sleep(Duration::from_secs(1)).await;
    }
  }
}

/// `@error_fallback` internal location's rate-limit zone name, keyed by
/// a hash of the domain rather than the domain itself so nginx zone
/// names stay valid identifiers (§4.E attack-mode directives).
fn rate_limit_zone_name(domain: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(domain.as_bytes());
  format!("zone_{}", hex::encode(hasher.finalize())[..12].to_string())
}

fn rfc1123_label_regex() -> &'static Regex {
  static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
      .expect("static rfc1123 regex is valid")
  })
}

fn validate_domain_label(domain: &str) -> Result<(), EngineError> {
  if domain.len() > 253 || !rfc1123_label_regex().is_match(&domain.to_lowercase()) {
    return Err(EngineError::EdgeConfigInvalid(format!("invalid domain: {domain}")));
  }
  Ok(())
}

fn validate_upstream_host(host: &str) -> Result<(), EngineError> {
  if host == "localhost" || host.parse::<std::net::Ipv4Addr>().is_ok() || rfc1123_label_regex().is_match(host) {
    return Ok(());
  }
  Err(EngineError::EdgeConfigInvalid(format!("invalid upstream host: {host}")))
}

pub type SharedEdgeRouter = Arc<EdgeRouter>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::host_executor::fake::FakeHostExecutor;

  fn router(dir: &std::path::Path) -> EdgeRouter {
    EdgeRouter::new(dir, Arc::new(FakeHostExecutor::default()))
  }

  #[test]
  fn rejects_invalid_domain_labels() {
    assert!(validate_domain_label("not a domain").is_err());
    assert!(validate_domain_label("-leading-dash.com").is_err());
    assert!(validate_domain_label("valid-label.example.com").is_ok());
  }

  #[test]
  fn accepts_localhost_and_ipv4_upstream_hosts() {
    assert!(validate_upstream_host("localhost").is_ok());
    assert!(validate_upstream_host("127.0.0.1").is_ok());
    assert!(validate_upstream_host("upstream.internal").is_ok());
    assert!(validate_upstream_host("not a host").is_err());
  }

  #[tokio::test]
  async fn configure_proxy_writes_and_restores_on_reload_failure() {
    let dir = tempdir();
    let router = router(dir.path());
    let fake = FakeHostExecutor::default();
    fake
      .result
      .lock()
      .unwrap()
      .replace(Err("boom".to_string()));
    let router = EdgeRouter::new(dir.path(), Arc::new(fake));

    let config = ProxyConfig {
      domain: "app.example.com".to_string(),
      aliases: vec![],
      upstream_host: "127.0.0.1".to_string(),
      upstream_port: 20000,
      upstream_scheme: UpstreamScheme::Http,
      attack_mode_enabled: false,
      wake_path: None,
      tls_cert_path: None,
      tls_key_path: None,
    };
    let err = router.configure_proxy(&config).await.unwrap_err();
    assert!(matches!(err, EngineError::EdgeConfigInvalid(_)));
    // No previous file existed, so the failed write should be rolled back.
    assert!(!router.config_path("app.example.com").exists());
  }

  fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
  }
}
