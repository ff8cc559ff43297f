//! Store adapters.
//!
//! [`StoreAdapter`] is the narrow write interface both backing stores implement.
//! It carries no synchronization logic. [`PrimaryStore`] extends it with the
//! read path and the mirror ledger that only the authoritative store keeps.

pub mod primary;
pub mod secondary;

use crate::model::{
    ActivityDraft, ActivityId, ActivityPatch, Channel, ContactSession, Message, MessageDraft,
    MessageReceipt, NaturalKey, ScheduledActivity, SessionDraft, SessionId, SessionStats,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use primary::SqlitePrimary;
pub use secondary::RestMirror;

/// Result of a session insert. `created` is false when an active session already existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInsert {
    pub id: String,
    pub created: bool,
}

/// How a store should locate an activity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityTarget {
    /// The store's own identifier.
    Id(String),
    /// Best-effort match on `(date, time_start, activity, category)`.
    NaturalKey(NaturalKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Session,
    Message,
    Activity,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Message => "message",
            Self::Activity => "activity",
        }
    }
}

/// A mirror operation waiting in the durable outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub operation: String,
    /// Entries sharing a key are delivered strictly in id order.
    pub session_key: Option<String>,
    /// Self-contained JSON encoding of the operation.
    pub payload: String,
    /// Delivery attempts made so far, including the inline one.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub dead: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Short name used in log fields.
    fn label(&self) -> &'static str;

    async fn find_active_session(&self, contact_identity: &str, channel: Channel) -> Result<Option<String>>;

    async fn insert_session(&self, draft: &SessionDraft) -> Result<SessionInsert>;

    /// Returns false when no active session had that id.
    async fn end_session(&self, session_ref: &str) -> Result<bool>;

    async fn insert_message(&self, session_ref: &str, draft: &MessageDraft) -> Result<MessageReceipt>;

    async fn insert_activity(&self, draft: &ActivityDraft) -> Result<String>;

    /// Returns the id of the updated row, or `None` when nothing matched.
    async fn update_activity(&self, target: &ActivityTarget, patch: &ActivityPatch) -> Result<Option<String>>;

    async fn delete_activity(&self, target: &ActivityTarget) -> Result<bool>;
}

/// The authoritative store: every read goes here.
#[async_trait]
pub trait PrimaryStore: StoreAdapter {
    async fn session(&self, id: &SessionId) -> Result<Option<ContactSession>>;

    /// Sessions for a contact, most recently updated first.
    async fn contact_sessions(&self, contact_identity: &str, channel: Option<Channel>) -> Result<Vec<ContactSession>>;

    async fn active_sessions(&self, limit: u32) -> Result<Vec<ContactSession>>;

    /// The last `limit` messages of a session in send order.
    async fn recent_messages(&self, session: &SessionId, limit: u32) -> Result<Vec<Message>>;

    async fn activity(&self, id: &ActivityId) -> Result<Option<ScheduledActivity>>;

    async fn session_stats(&self) -> Result<SessionStats>;

    async fn link(&self, kind: LinkKind, primary_id: &str, secondary_id: &str) -> Result<()>;

    async fn linked(&self, kind: LinkKind, primary_id: &str) -> Result<Option<String>>;

    async fn enqueue_mirror(
        &self,
        operation: &str,
        session_key: Option<&str>,
        payload: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64>;

    /// True when live entries for this session are still waiting.
    async fn has_pending_mirrors(&self, session_key: &str) -> Result<bool>;

    /// Due entries, at most one per session key: the oldest live one.
    async fn due_mirrors(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<OutboxEntry>>;

    async fn complete_mirror(&self, id: i64) -> Result<()>;

    /// Records a failed redelivery and bumps the attempt count.
    async fn reschedule_mirror(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>, dead: bool) -> Result<()>;

    async fn outbox_entries(&self, include_dead: bool, limit: u32) -> Result<Vec<OutboxEntry>>;

    async fn pending_mirror_count(&self) -> Result<i64>;
}
