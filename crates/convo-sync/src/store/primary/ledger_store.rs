//! Cross-store id links and the durable outbox of undelivered mirror operations.

use super::{encode_timestamp, now_micros, timestamp_or_now, SqlitePool};
use crate::store::{LinkKind, OutboxEntry};
use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;

const OUTBOX_COLUMNS: &str =
    "id, operation, session_key, payload, attempts, last_error, next_attempt_at, dead, created_at";

pub struct MirrorLedger {
    pool: Arc<SqlitePool>,
}

impl MirrorLedger {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// Records the secondary id for a primary row, replacing any earlier link.
    pub fn link(&self, kind: LinkKind, primary_id: &str, secondary_id: &str) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO mirror_links (kind, primary_id, secondary_id, linked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (kind, primary_id) DO UPDATE SET
                secondary_id = excluded.secondary_id,
                linked_at = excluded.linked_at",
            params![kind.as_str(), primary_id, secondary_id, encode_timestamp(now_micros())],
        )?;
        debug!("Linked {} {} -> {}", kind.as_str(), primary_id, secondary_id);
        Ok(())
    }

    pub fn linked(&self, kind: LinkKind, primary_id: &str) -> anyhow::Result<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT secondary_id FROM mirror_links WHERE kind = ?1 AND primary_id = ?2",
                params![kind.as_str(), primary_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Queues an operation whose inline delivery already failed once.
    pub fn enqueue(
        &self,
        operation: &str,
        session_key: Option<&str>,
        payload: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        let now = encode_timestamp(now_micros());
        conn.execute(
            "INSERT INTO mirror_outbox
             (operation, session_key, payload, attempts, last_error, next_attempt_at, dead, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, 0, ?6, ?6)",
            params![operation, session_key, payload, error, encode_timestamp(next_attempt_at), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn has_pending(&self, session_key: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM mirror_outbox WHERE session_key = ?1 AND dead = 0 LIMIT 1",
                [session_key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Live entries whose next attempt is due, oldest first.
    ///
    /// An entry is held back while an older live entry for the same session
    /// exists, so a session's writes reach the mirror in their original order.
    pub fn due(&self, now: DateTime<Utc>, limit: u32) -> anyhow::Result<Vec<OutboxEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mirror_outbox AS entry
             WHERE dead = 0 AND next_attempt_at <= ?1
               AND (session_key IS NULL OR NOT EXISTS (
                    SELECT 1 FROM mirror_outbox AS earlier
                    WHERE earlier.session_key = entry.session_key
                      AND earlier.dead = 0
                      AND earlier.id < entry.id))
             ORDER BY id
             LIMIT ?2",
            OUTBOX_COLUMNS
        ))?;
        let mut rows = stmt.query(params![encode_timestamp(now), i64::from(limit)])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    pub fn complete(&self, id: i64) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM mirror_outbox WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn reschedule(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>, dead: bool) -> anyhow::Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE mirror_outbox
             SET attempts = attempts + 1, last_error = ?1, next_attempt_at = ?2, dead = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                error,
                encode_timestamp(next_attempt_at),
                dead,
                encode_timestamp(now_micros()),
                id
            ],
        )?;
        Ok(())
    }

    pub fn list(&self, include_dead: bool, limit: u32) -> anyhow::Result<Vec<OutboxEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mirror_outbox
             WHERE ?1 OR dead = 0
             ORDER BY id
             LIMIT ?2",
            OUTBOX_COLUMNS
        ))?;
        let mut rows = stmt.query(params![include_dead, i64::from(limit)])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    pub fn pending_count(&self) -> anyhow::Result<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM mirror_outbox WHERE dead = 0", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_entry(row: &Row) -> anyhow::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.get(0)?,
        operation: row.get(1)?,
        session_key: row.get(2)?,
        payload: row.get(3)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        next_attempt_at: timestamp_or_now(&row.get::<_, String>(6)?, "outbox next_attempt_at"),
        dead: row.get(7)?,
        created_at: timestamp_or_now(&row.get::<_, String>(8)?, "outbox created_at"),
    })
}
