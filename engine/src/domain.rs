//! Domain generation (§6, §8 property 8). Deterministic for fixed
//! inputs; every label is lowercased, sanitized, collapsed, trimmed,
//! and truncated to 63 characters — the DNS label limit.

use sha1::{Digest, Sha1};

use crate::config::PreviewDomainStyle;

const MAX_LABEL_LEN: usize = 63;
const MAX_REF_LABEL_LEN: usize = 20;

/// Lowercase, replace anything outside `[a-z0-9-]` with `-`, collapse
/// repeated `-`, trim leading/trailing `-`, truncate to 63 chars.
pub fn sanitize_label(input: &str) -> String {
  let lowered = input.to_lowercase();
  let mut out = String::with_capacity(lowered.len());
  let mut last_was_dash = false;
  for c in lowered.chars() {
    let is_allowed = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    let mapped = if is_allowed { c } else { '-' };
    if mapped == '-' {
      if last_was_dash {
        continue;
      }
      last_was_dash = true;
    } else {
      last_was_dash = false;
    }
    out.push(mapped);
  }
  let trimmed = out.trim_matches('-');
  let truncated: String = trimmed.chars().take(MAX_LABEL_LEN).collect();
  truncated.trim_matches('-').to_string()
}

/// `refLabel` capped at 20 chars (after sanitizing).
fn sanitize_ref_label(ref_name: &str) -> String {
  let sanitized = sanitize_label(ref_name);
  sanitized.chars().take(MAX_REF_LABEL_LEN).collect::<String>()
}

/// `6hex` = SHA-1 of the ref truncated to 6 hex chars.
fn ref_hash6(ref_name: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(ref_name.as_bytes());
  let digest = hasher.finalize();
  hex::encode(digest)[..6].to_string()
}

/// Production domain: `<projectSlug>.<orgSlug>.<baseDomain>`.
pub fn production_domain(project_slug: &str, org_slug: &str, base_domain: &str) -> String {
  format!(
    "{}.{}.{}",
    sanitize_label(project_slug),
    sanitize_label(org_slug),
    base_domain
  )
}

/// Preview domain per `PREVIEW_DOMAIN_STYLE` (§6).
pub fn preview_domain(
  style: PreviewDomainStyle,
  project_slug: &str,
  org_slug: &str,
  ref_name: &str,
  preview_base_domain: &str,
) -> String {
  let project = sanitize_label(project_slug);
  match style {
    PreviewDomainStyle::Project => format!("{project}.{preview_base_domain}"),
    PreviewDomainStyle::ProjectRef => {
      let org = sanitize_label(org_slug);
      let ref_label = sanitize_ref_label(ref_name);
      let hash = ref_hash6(ref_name);
      format!("{project}-{ref_label}-{hash}.{org}.{preview_base_domain}")
    }
  }
}

/// CNAME target for custom domains: `<projectSlug>.<orgSlug>.<baseDomain>`.
pub fn cname_target(project_slug: &str, org_slug: &str, base_domain: &str) -> String {
  production_domain(project_slug, org_slug, base_domain)
}

/// Verification TXT record name: `_apployd-verify.<domain>`.
pub fn verification_txt_name(domain: &str) -> String {
  format!("_apployd-verify.{domain}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_collapses_and_trims() {
    assert_eq!(sanitize_label("My Cool App!!"), "my-cool-app");
    assert_eq!(sanitize_label("--leading-and-trailing--"), "leading-and-trailing");
  }

  #[test]
  fn sanitize_truncates_to_63() {
    let long = "a".repeat(100);
    assert_eq!(sanitize_label(&long).len(), 63);
  }

  #[test]
  fn production_domain_is_deterministic() {
    let a = production_domain("App", "Acme", "apployd.app");
    let b = production_domain("App", "Acme", "apployd.app");
    assert_eq!(a, b);
    assert_eq!(a, "app.acme.apployd.app");
  }

  #[test]
  fn preview_project_ref_style_includes_hash_and_caps_ref() {
    let ref_name = "feature/super-long-branch-name-here";
    let domain = preview_domain(
      PreviewDomainStyle::ProjectRef,
      "app",
      "acme",
      ref_name,
      "preview.apployd.app",
    );
    let ref_label = sanitize_ref_label(ref_name);
    assert_eq!(ref_label.len(), MAX_REF_LABEL_LEN);
    let prefix = format!("app-{ref_label}-");
    assert!(domain.starts_with(&prefix), "domain was {domain}");
    assert!(domain.ends_with(".acme.preview.apployd.app"));

    let hash_part = domain
      .trim_start_matches(&prefix)
      .split('.')
      .next()
      .unwrap();
    assert_eq!(hash_part.len(), 6);
  }

  #[test]
  fn cname_and_verification_name_match_rules() {
    assert_eq!(cname_target("app", "acme", "apployd.app"), "app.acme.apployd.app");
    assert_eq!(
      verification_txt_name("custom.example.com"),
      "_apployd-verify.custom.example.com"
    );
  }
}
