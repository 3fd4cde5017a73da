//! Versioned persistence for compiled ABAC policies.
//!
//! [`store::PolicyStore`] owns CRUD over the `policies` table plus its
//! append-only version history: source-naming invariants, grammar-version
//! validation on every write, optimistic version compare-and-set on
//! update, and transactional `policy_changed` change notification so a
//! subscriber never observes a notification for an uncommitted write.

pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use error::StoreError;
pub use model::{ListFilter, NewPolicy, PolicyUpdate, PolicyVersionHistoryEntry, StoredPolicy};
pub use store::{validate_source_naming, PolicyChanged, PolicyStore, POLICY_CHANGED_CHANNEL_CAPACITY};
