use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Database {
    // ── Rules ────────────────────────────────────────────────────

    pub fn insert_rule(&self, name: &str, definition: &str, priority: i64, enabled: bool) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO rule (name, definition, priority, enabled, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, definition, priority, enabled, now_millis()],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn update_rule(&self, id: i64, name: &str, definition: &str, priority: i64, enabled: bool) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE rule SET name = ?1, definition = ?2, priority = ?3, enabled = ?4 WHERE id = ?5",
            params![name, definition, priority, enabled, id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE rule SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        let changed = self
            .connection()
            .execute("DELETE FROM rule WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// All rules in declaration order.
    pub fn list_rules(&self) -> Result<Vec<RuleRow>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, name, definition, priority, enabled, match_count, created_at \
             FROM rule ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RuleRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    definition: row.get(2)?,
                    priority: row.get(3)?,
                    enabled: row.get(4)?,
                    match_count: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn add_rule_matches(&self, counts: &[(i64, u64)]) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE rule SET match_count = match_count + ?1 WHERE id = ?2")?;
            for (id, count) in counts {
                stmt.execute(params![*count as i64, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── Learning ─────────────────────────────────────────────────

    pub fn load_learning_profile(&self) -> Result<Option<String>> {
        self.connection()
            .query_row("SELECT profile FROM learning_profile WHERE id = 1", [], |row| row.get(0))
            .optional()
    }

    pub fn save_learning_profile(&self, profile_json: &str) -> Result<()> {
        self.connection().execute(
            "INSERT INTO learning_profile (id, profile, updated_at) VALUES (1, ?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at",
            params![profile_json, now_millis()],
        )?;
        Ok(())
    }

    /// Store the outcome id and the updated profile in one transaction.
    pub fn record_learning_outcome(
        &self,
        execution_id: &str,
        action_kind: &str,
        accepted: bool,
        recorded_at: &str,
        profile_json: &str,
    ) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO learning_outcome (execution_id, action_kind, accepted, recorded_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, action_kind, accepted, recorded_at],
        )?;
        tx.execute(
            "INSERT INTO learning_profile (id, profile, updated_at) VALUES (1, ?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at",
            params![profile_json, now_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn learning_outcome_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT execution_id FROM learning_outcome")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ── Checkpoints ──────────────────────────────────────────────

    /// Insert a checkpoint and all of its entries atomically.
    pub fn insert_checkpoint(&self, checkpoint: &CheckpointRow, entries: &[CheckpointEntryRow]) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        {
            tx.execute(
                "INSERT INTO checkpoint (id, created_at, action_kind, description, state, total_bytes, blob_dir, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    checkpoint.id,
                    checkpoint.created_at,
                    checkpoint.action_kind,
                    checkpoint.description,
                    checkpoint.state,
                    checkpoint.total_bytes,
                    checkpoint.blob_dir,
                    now_millis(),
                ],
            )?;

            let mut stmt = tx.prepare_cached(
                "INSERT INTO checkpoint_entry (checkpoint_id, seq, original_path, change_kind, blob_path, \
                 size, checksum, modified_ns, accessed_ns, mode, readonly, artifact_path, applied, restored) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    checkpoint.id,
                    entry.seq,
                    entry.original_path,
                    entry.change_kind,
                    entry.blob_path,
                    entry.size,
                    entry.checksum,
                    entry.modified_ns,
                    entry.accessed_ns,
                    entry.mode,
                    entry.readonly,
                    entry.artifact_path,
                    entry.applied,
                    entry.restored,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Checkpoint {} persisted with {} entries", checkpoint.id, entries.len());
        Ok(())
    }

    fn map_checkpoint(row: &rusqlite::Row<'_>) -> Result<CheckpointRow> {
        Ok(CheckpointRow {
            id: row.get(0)?,
            created_at: row.get(1)?,
            action_kind: row.get(2)?,
            description: row.get(3)?,
            state: row.get(4)?,
            total_bytes: row.get(5)?,
            blob_dir: row.get(6)?,
        })
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Option<CheckpointRow>> {
        self.connection()
            .query_row(
                "SELECT id, created_at, action_kind, description, state, total_bytes, blob_dir \
                 FROM checkpoint WHERE id = ?1",
                params![id],
                Self::map_checkpoint,
            )
            .optional()
    }

    /// Newest first. `states` restricts the listing when not empty.
    pub fn list_checkpoints(&self, states: &[&str], limit: i64) -> Result<Vec<CheckpointRow>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, created_at, action_kind, description, state, total_bytes, blob_dir \
             FROM checkpoint ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], Self::map_checkpoint)?
            .filter(|row| match row {
                Ok(r) => states.is_empty() || states.contains(&r.state.as_str()),
                Err(_) => true,
            })
            .take(limit.max(0) as usize)
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Checkpoints in `state` created strictly before `before_millis`.
    pub fn checkpoints_older_than(&self, state: &str, before_millis: i64) -> Result<Vec<CheckpointRow>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, created_at, action_kind, description, state, total_bytes, blob_dir \
             FROM checkpoint WHERE state = ?1 AND created_at < ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![state, before_millis], Self::map_checkpoint)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_checkpoint_entries(&self, id: &str) -> Result<Vec<CheckpointEntryRow>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT seq, original_path, change_kind, blob_path, size, checksum, modified_ns, \
                    accessed_ns, mode, readonly, artifact_path, applied, restored \
             FROM checkpoint_entry WHERE checkpoint_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(CheckpointEntryRow {
                    seq: row.get(0)?,
                    original_path: row.get(1)?,
                    change_kind: row.get(2)?,
                    blob_path: row.get(3)?,
                    size: row.get(4)?,
                    checksum: row.get(5)?,
                    modified_ns: row.get(6)?,
                    accessed_ns: row.get(7)?,
                    mode: row.get(8)?,
                    readonly: row.get(9)?,
                    artifact_path: row.get(10)?,
                    applied: row.get(11)?,
                    restored: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_checkpoint_state(&self, id: &str, state: &str) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE checkpoint SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, now_millis(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_entry_applied(&self, id: &str, seq: i64, artifact_path: Option<&str>) -> Result<()> {
        self.connection().execute(
            "UPDATE checkpoint_entry SET applied = 1, artifact_path = ?1 \
             WHERE checkpoint_id = ?2 AND seq = ?3",
            params![artifact_path, id, seq],
        )?;
        Ok(())
    }

    pub fn mark_entry_restored(&self, id: &str, seq: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE checkpoint_entry SET restored = 1 WHERE checkpoint_id = ?1 AND seq = ?2",
            params![id, seq],
        )?;
        Ok(())
    }

    // ── Meta ─────────────────────────────────────────────────────

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.connection()
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.connection().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
