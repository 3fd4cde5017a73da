//! `PolicyStore`: CRUD over persisted policies with version history,
//! source-naming invariants, grammar-version validation and transactional
//! change notification.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use abac_dsl::ast::validate_grammar_version;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::{ListFilter, NewPolicy, PolicyUpdate, PolicyVersionHistoryEntry, StoredPolicy};
use crate::schema::init_database;

pub const POLICY_CHANGED_CHANNEL_CAPACITY: usize = 64;

const POLICY_COLUMNS: &str =
    "id, name, description, effect, source, dsl_text, compiled_ast, enabled, seed_version, created_by, version, created_at, updated_at";

/// Broadcast on the `policy_changed` channel whenever create/update/delete
/// commits, carrying just enough to let a subscriber decide whether to
/// reload its own copy of the policy.
#[derive(Debug, Clone)]
pub struct PolicyChanged {
    pub policy_id: String,
}

pub struct PolicyStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<PolicyChanged>,
}

impl PolicyStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    pub fn open_with_config(path: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;
        let (changes, _receiver) = broadcast::channel(config.notification_channel_capacity);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Subscribes to the `policy_changed` notification channel.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PolicyChanged> {
        self.changes.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("policy store connection poisoned")
    }

    pub fn create(&self, new_policy: NewPolicy) -> Result<StoredPolicy, StoreError> {
        validate_source_naming(&new_policy.name, &new_policy.source)?;
        validate_grammar_version(&new_policy.compiled_ast)
            .map_err(|err| StoreError::PolicyInvalidAst { reason: err.to_string() })?;

        let id = Ulid::new().to_string();
        let now = Utc::now().to_rfc3339();
        let compiled_ast_text = new_policy.compiled_ast.to_string();

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|err| StoreError::PolicyCreateFailed(err.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO policies (
                id, name, description, effect, source, dsl_text, compiled_ast,
                enabled, seed_version, created_by, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)
            "#,
            params![
                id,
                new_policy.name,
                new_policy.description,
                new_policy.effect,
                new_policy.source,
                new_policy.dsl_text,
                compiled_ast_text,
                new_policy.enabled as i64,
                new_policy.seed_version,
                new_policy.created_by,
                now,
            ],
        )
        .map_err(|err| StoreError::PolicyCreateFailed(err.to_string()))?;

        tx.commit().map_err(|err| StoreError::PolicyCreateFailed(err.to_string()))?;
        drop(conn);

        let _ = self.changes.send(PolicyChanged { policy_id: id.clone() });
        info!(policy_id = %id, name = %new_policy.name, "created policy");

        self.get_by_id(&id)?
            .ok_or_else(|| StoreError::PolicyCreateFailed("row vanished after insert".to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Option<StoredPolicy>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE name = ?1"))?;
        Ok(stmt.query_row(params![name], map_policy_row).optional()?)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<StoredPolicy>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], map_policy_row).optional()?)
    }

    /// Reads the current row, and if `update.dsl_text` differs from what's
    /// stored appends a history row and bumps `version`; otherwise updates
    /// the non-DSL fields in place. Notification fires either way.
    pub fn update(&self, name: &str, update: PolicyUpdate) -> Result<StoredPolicy, StoreError> {
        validate_grammar_version(&update.compiled_ast)
            .map_err(|err| StoreError::PolicyInvalidAst { reason: err.to_string() })?;

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?;

        let current = {
            let mut stmt = tx
                .prepare(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE name = ?1"))
                .map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?;
            stmt.query_row(params![name], map_policy_row)
                .optional()
                .map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?
                .ok_or(StoreError::PolicyNotFound)?
        };

        if current.version != update.expected_version {
            return Err(StoreError::VersionConflict {
                name: name.to_string(),
                expected: update.expected_version,
                actual: current.version,
            });
        }

        let now = Utc::now().to_rfc3339();
        let dsl_changed = update.dsl_text != current.dsl_text;
        let new_version = if dsl_changed { current.version + 1 } else { current.version };

        if dsl_changed {
            let history_id = Ulid::new().to_string();
            tx.execute(
                r#"
                INSERT INTO policy_version_history (
                    id, policy_id, version, prior_dsl_text, changed_by, change_note, changed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    history_id,
                    current.id,
                    current.version,
                    current.dsl_text,
                    update.changed_by,
                    update.change_note,
                    now,
                ],
            )
            .map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?;
        }

        let rows_affected = tx
            .execute(
                r#"
                UPDATE policies
                SET description = ?1, dsl_text = ?2, compiled_ast = ?3, enabled = ?4, version = ?5, updated_at = ?6
                WHERE id = ?7 AND version = ?8
                "#,
                params![
                    update.description,
                    update.dsl_text,
                    update.compiled_ast.to_string(),
                    update.enabled as i64,
                    new_version,
                    now,
                    current.id,
                    current.version,
                ],
            )
            .map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?;

        if rows_affected == 0 {
            return Err(StoreError::VersionConflict {
                name: name.to_string(),
                expected: update.expected_version,
                actual: current.version,
            });
        }

        tx.commit().map_err(|err| StoreError::PolicyUpdateFailed(err.to_string()))?;
        drop(conn);

        let _ = self.changes.send(PolicyChanged {
            policy_id: current.id.clone(),
        });
        debug!(policy_id = %current.id, name, dsl_changed, "updated policy");

        self.get_by_id(&current.id)?.ok_or(StoreError::PolicyNotFound)
    }

    /// Looks up the id by name, deletes the row (cascading history), and
    /// emits the notification - all inside one transaction.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|err| StoreError::PolicyDeleteFailed(err.to_string()))?;

        let id: String = {
            let mut stmt = tx
                .prepare("SELECT id FROM policies WHERE name = ?1")
                .map_err(|err| StoreError::PolicyDeleteFailed(err.to_string()))?;
            stmt.query_row(params![name], |row| row.get(0))
                .optional()
                .map_err(|err| StoreError::PolicyDeleteFailed(err.to_string()))?
                .ok_or(StoreError::PolicyNotFound)?
        };

        tx.execute("DELETE FROM policies WHERE id = ?1", params![id])
            .map_err(|err| StoreError::PolicyDeleteFailed(err.to_string()))?;

        tx.commit().map_err(|err| StoreError::PolicyDeleteFailed(err.to_string()))?;
        drop(conn);

        let _ = self.changes.send(PolicyChanged { policy_id: id.clone() });
        debug!(policy_id = %id, name, "deleted policy");
        Ok(())
    }

    pub fn list_enabled(&self) -> Result<Vec<StoredPolicy>, StoreError> {
        self.list(&ListFilter {
            enabled: Some(true),
            ..Default::default()
        })
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<StoredPolicy>, StoreError> {
        let conn = self.lock();

        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, Box<dyn ToSql>)> = Vec::new();

        if let Some(source) = &filter.source {
            conditions.push("source = :source");
            bindings.push((":source", Box::new(source.clone())));
        }
        if let Some(enabled) = filter.enabled {
            conditions.push("enabled = :enabled");
            bindings.push((":enabled", Box::new(enabled as i64)));
        }
        if let Some(effect) = &filter.effect {
            conditions.push("effect = :effect");
            bindings.push((":effect", Box::new(effect.clone())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policies {where_clause} ORDER BY name ASC");

        let param_refs: Vec<(&str, &dyn ToSql)> =
            bindings.iter().map(|(key, value)| (*key, value.as_ref())).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_policy_row)?;

        let mut policies = Vec::new();
        for row in rows {
            policies.push(row?);
        }
        Ok(policies)
    }

    /// Returns every recorded prior version of a policy's DSL text, oldest
    /// first. Empty if the policy has never had a DSL-changing update.
    pub fn history(&self, policy_id: &str) -> Result<Vec<PolicyVersionHistoryEntry>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, policy_id, version, prior_dsl_text, changed_by, change_note, changed_at
            FROM policy_version_history
            WHERE policy_id = ?1
            ORDER BY version ASC
            "#,
        )?;
        let rows = stmt.query_map(params![policy_id], map_history_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn map_history_row(row: &Row) -> rusqlite::Result<PolicyVersionHistoryEntry> {
    Ok(PolicyVersionHistoryEntry {
        id: row.get(0)?,
        policy_id: row.get(1)?,
        version: row.get(2)?,
        prior_dsl_text: row.get(3)?,
        changed_by: row.get(4)?,
        change_note: row.get(5)?,
        changed_at: row.get(6)?,
    })
}

fn map_policy_row(row: &Row) -> rusqlite::Result<StoredPolicy> {
    let compiled_ast_text: String = row.get(6)?;
    let compiled_ast: JsonValue = serde_json::from_str(&compiled_ast_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(StoredPolicy {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        effect: row.get(3)?,
        source: row.get(4)?,
        dsl_text: row.get(5)?,
        compiled_ast,
        enabled: row.get::<_, i64>(7)? != 0,
        seed_version: row.get(8)?,
        created_by: row.get(9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// A name prefixed `seed:` requires source `seed`; a name prefixed
/// `lock:` requires source `lock`; conversely source `seed` (resp.
/// `lock`) requires the matching prefix. Any other combination is free.
pub fn validate_source_naming(name: &str, source: &str) -> Result<(), StoreError> {
    let seed_prefixed = name.starts_with("seed:");
    let lock_prefixed = name.starts_with("lock:");
    let is_seed_source = source == "seed";
    let is_lock_source = source == "lock";

    if seed_prefixed == is_seed_source && lock_prefixed == is_lock_source {
        return Ok(());
    }

    let expected_source = if seed_prefixed {
        "seed"
    } else if lock_prefixed {
        "lock"
    } else {
        "anything but seed/lock"
    };

    Err(StoreError::PolicySourceMismatch {
        name: name.to_string(),
        expected_source: expected_source.to_string(),
        actual_source: source.to_string(),
    })
}
