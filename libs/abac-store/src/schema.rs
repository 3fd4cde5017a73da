use rusqlite::Connection;

use crate::error::StoreError;

pub const POLICIES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS policies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    effect TEXT NOT NULL,
    source TEXT NOT NULL,
    dsl_text TEXT NOT NULL,
    compiled_ast TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    seed_version INTEGER,
    created_by TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const POLICY_VERSION_HISTORY_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS policy_version_history (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    version INTEGER NOT NULL,
    prior_dsl_text TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    change_note TEXT,
    changed_at TEXT NOT NULL
);
"#;

pub const POLICY_VERSION_HISTORY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_policy_version_history_policy_id ON policy_version_history(policy_id);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(POLICIES_TABLE_SCHEMA)?;
    conn.execute_batch(POLICY_VERSION_HISTORY_TABLE_SCHEMA)?;
    conn.execute_batch(POLICY_VERSION_HISTORY_INDEX)?;
    Ok(())
}
