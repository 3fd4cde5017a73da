//! Row shapes the policy store reads and writes.

use serde_json::Value as JsonValue;

/// A persisted policy, one row of `policies`.
#[derive(Debug, Clone)]
pub struct StoredPolicy {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub effect: String,
    pub source: String,
    pub dsl_text: String,
    pub compiled_ast: JsonValue,
    pub enabled: bool,
    pub seed_version: Option<i64>,
    pub created_by: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of `policy_version_history`, appended whenever an update
/// changes a policy's DSL text.
#[derive(Debug, Clone)]
pub struct PolicyVersionHistoryEntry {
    pub id: String,
    pub policy_id: String,
    pub version: i64,
    pub prior_dsl_text: String,
    pub changed_by: String,
    pub change_note: Option<String>,
    pub changed_at: String,
}

/// The fields a caller supplies to create a policy. `id`, `version` and
/// the timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub name: String,
    pub description: Option<String>,
    pub effect: String,
    pub source: String,
    pub dsl_text: String,
    pub compiled_ast: JsonValue,
    pub enabled: bool,
    pub seed_version: Option<i64>,
    pub created_by: String,
}

/// The fields a caller may change on an existing policy. Name and source
/// are immutable after creation - the source-naming invariant only needs
/// checking once, at creation time.
///
/// `expected_version` is the version the caller last read. The store
/// performs a compare-and-set against it rather than relying on the
/// row lock alone, so two concurrent writers racing on the same policy
/// can't silently clobber one another's change.
#[derive(Debug, Clone)]
pub struct PolicyUpdate {
    pub expected_version: i64,
    pub description: Option<String>,
    pub dsl_text: String,
    pub compiled_ast: JsonValue,
    pub enabled: bool,
    pub changed_by: String,
    pub change_note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub source: Option<String>,
    pub enabled: Option<bool>,
    pub effect: Option<String>,
}
