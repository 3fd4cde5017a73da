use thiserror::Error;

/// Failure classifications the store reports to callers. Create/update/
/// delete each bucket their own infrastructure failures into one
/// operation-specific variant so callers can tell "this didn't exist" from
/// "the write itself failed" from "the payload was malformed".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy not found")]
    PolicyNotFound,

    #[error("policy '{name}' was updated concurrently: expected version {expected}, found {actual}")]
    VersionConflict {
        name: String,
        expected: i64,
        actual: i64,
    },

    #[error("policy name '{name}' requires source '{expected_source}' (got '{actual_source}')")]
    PolicySourceMismatch {
        name: String,
        expected_source: String,
        actual_source: String,
    },

    #[error("compiled_ast is not a valid policy record: {reason}")]
    PolicyInvalidAst { reason: String },

    #[error("failed to create policy: {0}")]
    PolicyCreateFailed(String),

    #[error("failed to update policy: {0}")]
    PolicyUpdateFailed(String),

    #[error("failed to delete policy: {0}")]
    PolicyDeleteFailed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
