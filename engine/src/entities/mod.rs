//! Core data model (§3). Every entity is a document collection in the
//! durable store; enums round-trip through storage as lowercase
//! `snake_case` strings via `strum`/`serde`.

mod container;
mod custom_domain;
mod deployment;
mod log_entry;
mod misc;
mod organization;
mod project;
mod server;
mod subscription;
mod usage_record;

pub use container::*;
pub use custom_domain::*;
pub use deployment::*;
pub use log_entry::*;
pub use misc::*;
pub use organization::*;
pub use project::*;
pub use server::*;
pub use subscription::*;
pub use usage_record::*;

/// Generate a new entity id. Komodo-style cuid2, so ids are client-side
/// generated, URL-safe, and sortable-enough for debugging without
/// leaking a monotonic counter.
pub fn new_id() -> String {
  cuid2::create_id()
}
