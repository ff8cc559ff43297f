use super::{encode_timestamp, now_micros, timestamp_or_now, SqlitePool};
use crate::model::{
    Channel, ContactSession, Message, MessageDraft, MessageId, MessageKind, MessageReceipt,
    SessionDraft, SessionId, SessionState, SessionStats,
};
use crate::store::SessionInsert;
use anyhow::Context;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;
use tracing::{debug, info};

const SESSION_COLUMNS: &str =
    "id, contact_identity, display_name, avatar_ref, channel, state, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, session_id, sequence, sender_identity, sender_display_name, \
     content, kind, media_ref, is_from_agent, created_at";

/// Contact sessions and the messages they own.
pub struct SessionStore {
    pool: Arc<SqlitePool>,
}

impl SessionStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn find_active(&self, contact_identity: &str, channel: Channel) -> anyhow::Result<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM chat_sessions
                 WHERE contact_identity = ?1 AND channel = ?2 AND state = 'active'",
                params![contact_identity, channel.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up active session")?;
        Ok(id)
    }

    /// Inserts an active session unless one already exists for the contact and channel.
    ///
    /// The partial unique index on active sessions makes this atomic: when two
    /// callers race, one insert is ignored and that caller reads back the winner.
    pub fn insert_active(&self, draft: &SessionDraft) -> anyhow::Result<SessionInsert> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = SessionId::generate().into_inner();
        let now = encode_timestamp(now_micros());
        let inserted = tx
            .execute(
                "INSERT INTO chat_sessions
                 (id, contact_identity, display_name, avatar_ref, channel, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)
                 ON CONFLICT DO NOTHING",
                params![
                    id,
                    draft.contact_identity,
                    draft.display_name,
                    draft.avatar_ref,
                    draft.channel.as_str(),
                    now,
                ],
            )
            .context("Failed to insert session")?;

        let result = if inserted == 1 {
            info!("Created session {} for {} on {}", id, draft.contact_identity, draft.channel);
            SessionInsert { id, created: true }
        } else {
            let existing: String = tx
                .query_row(
                    "SELECT id FROM chat_sessions
                     WHERE contact_identity = ?1 AND channel = ?2 AND state = 'active'",
                    params![draft.contact_identity, draft.channel.as_str()],
                    |row| row.get(0),
                )
                .context("Active session vanished after conflicting insert")?;
            debug!("Reusing active session {} for {}", existing, draft.contact_identity);
            SessionInsert {
                id: existing,
                created: false,
            }
        };

        tx.commit()?;
        Ok(result)
    }

    pub fn end(&self, session_id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE chat_sessions SET state = 'ended', updated_at = ?1
             WHERE id = ?2 AND state = 'active'",
            params![encode_timestamp(now_micros()), session_id],
        )?;
        if changed > 0 {
            info!("Ended session {}", session_id);
        }
        Ok(changed > 0)
    }

    pub fn get(&self, session_id: &str) -> anyhow::Result<Option<ContactSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM chat_sessions WHERE id = ?1", SESSION_COLUMNS))?;
        let mut rows = stmt.query([session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    pub fn for_contact(&self, contact_identity: &str, channel: Option<Channel>) -> anyhow::Result<Vec<ContactSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_sessions
             WHERE contact_identity = ?1 AND (?2 IS NULL OR channel = ?2)
             ORDER BY updated_at DESC, created_at DESC",
            SESSION_COLUMNS
        ))?;
        let mut rows = stmt.query(params![contact_identity, channel.map(Channel::as_str)])?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    pub fn active(&self, limit: u32) -> anyhow::Result<Vec<ContactSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_sessions
             WHERE state = 'active'
             ORDER BY updated_at DESC
             LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let mut rows = stmt.query([i64::from(limit)])?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    /// Appends a message with the next per-session sequence number.
    ///
    /// `created_at` never goes backwards within a session, even if the wall
    /// clock does. The owning session's `updated_at` moves to the same instant.
    pub fn append_message(&self, session_id: &str, draft: &MessageDraft) -> anyhow::Result<MessageReceipt> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (last_sequence, last_created): (i64, Option<String>) = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0), MAX(created_at) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut created_at = now_micros();
        if let Some(previous) = last_created.as_deref().and_then(super::parse_timestamp) {
            if previous > created_at {
                created_at = previous;
            }
        }
        let created_str = encode_timestamp(created_at);

        let touched = tx.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![created_str, session_id],
        )?;
        if touched == 0 {
            anyhow::bail!("session {} does not exist", session_id);
        }

        let id = MessageId::generate().into_inner();
        let sequence = last_sequence + 1;
        tx.execute(
            &format!("INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", MESSAGE_COLUMNS),
            params![
                id,
                session_id,
                sequence,
                draft.sender_identity,
                draft.sender_display_name,
                draft.content,
                draft.kind.as_str(),
                draft.media_ref,
                draft.is_from_agent,
                created_str,
            ],
        )
        .context("Failed to insert message")?;

        tx.commit()?;
        debug!("Stored message {} (#{}) in session {}", id, sequence, session_id);

        Ok(MessageReceipt {
            id,
            sequence,
            created_at,
        })
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: &str, limit: u32) -> anyhow::Result<Vec<Message>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE session_id = ?1
             ORDER BY sequence DESC
             LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let mut rows = stmt.query(params![session_id, i64::from(limit)])?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn stats(&self) -> anyhow::Result<SessionStats> {
        let conn = self.get_conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(state = 'active'), 0),
                    COALESCE(SUM(channel = 'chat'), 0),
                    COALESCE(SUM(channel = 'whatsapp'), 0)
             FROM chat_sessions",
            [],
            |row| {
                Ok(SessionStats {
                    total_sessions: row.get(0)?,
                    active_sessions: row.get(1)?,
                    chat_sessions: row.get(2)?,
                    whatsapp_sessions: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn row_to_session(row: &Row) -> anyhow::Result<ContactSession> {
    let channel: String = row.get(4)?;
    let state: String = row.get(5)?;
    Ok(ContactSession {
        id: SessionId::new(row.get::<_, String>(0)?),
        contact_identity: row.get(1)?,
        display_name: row.get(2)?,
        avatar_ref: row.get(3)?,
        channel: Channel::from_str_opt(&channel)
            .ok_or_else(|| anyhow::anyhow!("Unknown channel in chat_sessions: {}", channel))?,
        state: SessionState::from_str_opt(&state)
            .ok_or_else(|| anyhow::anyhow!("Unknown session state: {}", state))?,
        created_at: timestamp_or_now(&row.get::<_, String>(6)?, "session created_at"),
        updated_at: timestamp_or_now(&row.get::<_, String>(7)?, "session updated_at"),
    })
}

fn row_to_message(row: &Row) -> anyhow::Result<Message> {
    let kind: String = row.get(6)?;
    Ok(Message {
        id: MessageId::new(row.get::<_, String>(0)?),
        session_id: SessionId::new(row.get::<_, String>(1)?),
        sequence: row.get(2)?,
        sender_identity: row.get(3)?,
        sender_display_name: row.get(4)?,
        content: row.get(5)?,
        kind: MessageKind::from_str_opt(&kind).unwrap_or(MessageKind::Text),
        media_ref: row.get(7)?,
        is_from_agent: row.get(8)?,
        created_at: timestamp_or_now(&row.get::<_, String>(9)?, "message created_at"),
    })
}
