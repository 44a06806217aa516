//! Durable store (§A). One MongoDB collection per entity from
//! `entities/`; `servers`, `projects`, and `deployments` are always
//! mutated inside a multi-document ACID transaction, matching the
//! teacher's transactional resource-mutation pattern
//! (`bin/core/src/resource/server.rs`) even though the teacher's own
//! `mungos` wrapper isn't available here — this talks to `mongodb`
//! directly.

use bson::doc;
use mongodb::{
  Client, ClientSession, Collection, Database,
  options::{TransactionOptions, WriteConcern},
};

use crate::entities::{
  AuditLog, Container, CustomDomain, Deployment, LogEntry, Organization, OrganizationInvite,
  Project, Server, Subscription, UsageRecord, WebhookEvent,
};

/// Process-wide handle to the durable store, built once in `main` and
/// shared via `EngineContext` (Design Notes: dependency-injected
/// handles, not module-level globals).
#[derive(Clone)]
pub struct Store {
  db: Database,
}

impl Store {
  pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
    let client = Client::with_uri_str(database_url).await?;
    let db = client.default_database().ok_or_else(|| {
      anyhow::anyhow!("DATABASE_URL must include a default database name")
    })?;
    let store = Self { db };
    store.ensure_indexes().await?;
    Ok(store)
  }

  async fn ensure_indexes(&self) -> anyhow::Result<()> {
    use mongodb::IndexModel;

    self
      .custom_domains()
      .create_index(
        IndexModel::builder()
          .keys(doc! { "domain": 1 })
          .options(mongodb::options::IndexOptions::builder().unique(true).build())
          .build(),
      )
      .await?;

    self
      .webhook_events()
      .create_index(
        IndexModel::builder()
          .keys(doc! { "eventId": 1 })
          .options(mongodb::options::IndexOptions::builder().unique(true).build())
          .build(),
      )
      .await?;

    self
      .usage_records()
      .create_index(
        IndexModel::builder().keys(doc! { "projectId": 1, "recordedAt": 1 }).build(),
      )
      .await?;

    Ok(())
  }

  pub fn organizations(&self) -> Collection<Organization> {
    self.db.collection("organizations")
  }
  pub fn organization_invites(&self) -> Collection<OrganizationInvite> {
    self.db.collection("organization_invites")
  }
  pub fn subscriptions(&self) -> Collection<Subscription> {
    self.db.collection("subscriptions")
  }
  pub fn servers(&self) -> Collection<Server> {
    self.db.collection("servers")
  }
  pub fn projects(&self) -> Collection<Project> {
    self.db.collection("projects")
  }
  pub fn custom_domains(&self) -> Collection<CustomDomain> {
    self.db.collection("custom_domains")
  }
  pub fn deployments(&self) -> Collection<Deployment> {
    self.db.collection("deployments")
  }
  pub fn containers(&self) -> Collection<Container> {
    self.db.collection("containers")
  }
  pub fn usage_records(&self) -> Collection<UsageRecord> {
    self.db.collection("usage_records")
  }
  pub fn log_entries(&self) -> Collection<LogEntry> {
    self.db.collection("log_entries")
  }
  pub fn audit_logs(&self) -> Collection<AuditLog> {
    self.db.collection("audit_logs")
  }
  pub fn webhook_events(&self) -> Collection<WebhookEvent> {
    self.db.collection("webhook_events")
  }

  /// Starts a serializable, majority-committed session for the
  /// `servers`/`projects`/`deployments` allocation transaction (§3
  /// persistence mapping, §5 shared resource policy).
  pub async fn start_allocation_session(&self) -> anyhow::Result<ClientSession> {
    let mut session = self.db.client().start_session().await?;
    let options = TransactionOptions::builder()
      .write_concern(WriteConcern::majority())
      .build();
    session.start_transaction().with_options(options).await?;
    Ok(session)
  }
}
