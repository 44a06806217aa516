//! DNS adapter (§4.G). Optional: when provider credentials are absent
//! from `Config`, callers should skip this stage entirely rather than
//! construct a `DnsAdapter` (checked via `Config::dns_configured`).

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub struct DnsAdapter {
  client: reqwest::Client,
  api_token: String,
  zone_id: String,
}

#[derive(Serialize)]
struct UpsertRecordRequest<'a> {
  r#type: &'a str,
  name: &'a str,
  content: &'a str,
  ttl: u32,
  proxied: bool,
}

#[derive(Deserialize)]
struct CloudflareListResponse {
  result: Vec<CloudflareRecord>,
}

#[derive(Deserialize)]
struct CloudflareRecord {
  id: String,
}

impl DnsAdapter {
  pub fn new(api_token: impl Into<String>, zone_id: impl Into<String>) -> Self {
    Self { client: reqwest::Client::new(), api_token: api_token.into(), zone_id: zone_id.into() }
  }

  /// Idempotent A-record upsert: looks up an existing record for
  /// `domain`, then PATCHes it, or creates one if absent.
  pub async fn upsert_a_record(&self, domain: &str, ipv4: &str) -> Result<(), EngineError> {
    let base = format!("https://api.cloudflare.com/client/v4/zones/{}/dns_records", self.zone_id);

    let existing = self
      .client
      .get(&base)
      .bearer_auth(&self.api_token)
      .query(&[("type", "A"), ("name", domain)])
      .send()
      .await
      .map_err(|e| EngineError::Other(anyhow::anyhow!(e).context("listing dns records")))?
      .json::<CloudflareListResponse>()
      .await
      .map_err(|e| EngineError::Other(anyhow::anyhow!(e).context("parsing dns list response")))?;

    let body = UpsertRecordRequest { r#type: "A", name: domain, content: ipv4, ttl: 300, proxied: false };

    let request = match existing.result.first() {
      Some(record) => self.client.patch(format!("{base}/{}", record.id)),
      None => self.client.post(&base),
    };

    request
      .bearer_auth(&self.api_token)
      .json(&body)
      .send()
      .await
      .map_err(|e| EngineError::Other(anyhow::anyhow!(e).context("upserting dns record")))?
      .error_for_status()
      .map_err(|e| EngineError::Other(anyhow::anyhow!(e).context("dns provider rejected upsert")))?;

    Ok(())
  }
}
