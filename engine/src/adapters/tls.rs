//! TLS adapter (§4.F). `ensureCertificate` is idempotent: ACME
//! challenges are served from the edge router's well-known path, so
//! this adapter only drives the host executor's certbot invocation and
//! reports paths back to the caller.

use std::time::Duration;

use crate::{adapters::host_executor::SharedHostExecutor, error::EngineError};

#[derive(Debug, Clone)]
pub struct CertificatePaths {
  pub cert_path: String,
  pub key_path: String,
}

pub struct TlsAdapter {
  executor: SharedHostExecutor,
  cert_root: String,
}

impl TlsAdapter {
  pub fn new(executor: SharedHostExecutor, cert_root: impl Into<String>) -> Self {
    Self { executor, cert_root: cert_root.into() }
  }

  pub async fn ensure_certificate(
    &self,
    domain: &str,
    aliases: &[String],
  ) -> Result<CertificatePaths, EngineError> {
    let mut args: Vec<&str> = vec![
      "certonly",
      "--nginx",
      "--non-interactive",
      "--agree-tos",
      "-d",
      domain,
    ];
    for alias in aliases {
      args.push("-d");
      args.push(alias);
    }

    self
      .executor
      .run("certbot issue", "certbot", &args, Duration::from_secs(60), None)
      .await
      .map_err(|e| EngineError::CertificateIssuanceFailed(e.to_string()))?;

    Ok(CertificatePaths {
      cert_path: format!("{}/{domain}/fullchain.pem", self.cert_root),
      key_path: format!("{}/{domain}/privkey.pem", self.cert_root),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::adapters::host_executor::fake::FakeHostExecutor;

  #[tokio::test]
  async fn builds_expected_cert_paths_on_success() {
    let fake = Arc::new(FakeHostExecutor::default());
    let adapter = TlsAdapter::new(fake, "/etc/letsencrypt/live");
    let paths = adapter
      .ensure_certificate("app.example.com", &["www.app.example.com".to_string()])
      .await
      .unwrap();
    assert_eq!(paths.cert_path, "/etc/letsencrypt/live/app.example.com/fullchain.pem");
  }

  #[tokio::test]
  async fn wraps_command_failures_as_certificate_issuance_failed() {
    let fake = FakeHostExecutor::default();
    fake.result.lock().unwrap().replace(Err("boom".to_string()));
    let adapter = TlsAdapter::new(Arc::new(fake), "/etc/letsencrypt/live");
    let err = adapter.ensure_certificate("app.example.com", &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::CertificateIssuanceFailed(_)));
  }
}
