//! Write operations, their mirrored form and the outcomes reported to callers.

use crate::model::{
    ActivityDraft, ActivityId, ActivityPatch, ContactSession, MessageDraft, NaturalKey, SessionDraft,
    SessionId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A state-changing operation applied to the primary store, then mirrored.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    CreateSession(SessionDraft),
    EndSession(SessionId),
    InsertMessage { session_id: SessionId, draft: MessageDraft },
    UpsertActivity(ActivityWrite),
    /// `match_key` is the activity's natural key before deletion.
    DeleteActivity { id: ActivityId, match_key: NaturalKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityWrite {
    Create(ActivityDraft),
    /// `match_key` is the activity's natural key before the patch.
    Update {
        id: ActivityId,
        patch: ActivityPatch,
        match_key: NaturalKey,
    },
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "create_session",
            Self::EndSession(_) => "end_session",
            Self::InsertMessage { .. } => "insert_message",
            Self::UpsertActivity(ActivityWrite::Create(_)) => "create_activity",
            Self::UpsertActivity(ActivityWrite::Update { .. }) => "update_activity",
            Self::DeleteActivity { .. } => "delete_activity",
        }
    }

    /// Writes sharing this key are serialized. A new activity has no id yet
    /// and is keyed once the primary assigns one.
    pub(crate) fn session_key(&self) -> Option<String> {
        match self {
            Self::CreateSession(draft) => Some(format!("{}|{}", draft.channel, draft.contact_identity)),
            Self::EndSession(id) => Some(id.to_string()),
            Self::InsertMessage { session_id, .. } => Some(session_id.to_string()),
            Self::UpsertActivity(ActivityWrite::Create(_)) => None,
            Self::UpsertActivity(ActivityWrite::Update { id, .. }) | Self::DeleteActivity { id, .. } => {
                Some(activity_key(id.as_str()))
            }
        }
    }
}

/// The secondary half of a write, self-contained so it can sit in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MirrorOp {
    CreateSession {
        primary_id: String,
        draft: SessionDraft,
    },
    EndSession {
        session: ContactSession,
    },
    InsertMessage {
        primary_id: String,
        session: ContactSession,
        draft: MessageDraft,
    },
    CreateActivity {
        primary_id: String,
        draft: ActivityDraft,
    },
    UpdateActivity {
        primary_id: String,
        patch: ActivityPatch,
        match_key: NaturalKey,
    },
    DeleteActivity {
        primary_id: String,
        match_key: NaturalKey,
    },
}

impl MirrorOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::EndSession { .. } => "end_session",
            Self::InsertMessage { .. } => "insert_message",
            Self::CreateActivity { .. } => "create_activity",
            Self::UpdateActivity { .. } => "update_activity",
            Self::DeleteActivity { .. } => "delete_activity",
        }
    }

    /// Outbox ordering key: one per session, one per activity.
    pub(crate) fn session_key(&self) -> Option<String> {
        match self {
            Self::CreateSession { primary_id, .. } => Some(primary_id.clone()),
            Self::EndSession { session } | Self::InsertMessage { session, .. } => Some(session.id.to_string()),
            Self::CreateActivity { primary_id, .. }
            | Self::UpdateActivity { primary_id, .. }
            | Self::DeleteActivity { primary_id, .. } => Some(activity_key(primary_id)),
        }
    }
}

fn activity_key(primary_id: &str) -> String {
    format!("activity:{}", primary_id)
}

/// What happened to the secondary half of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    Mirrored,
    /// Delivery failed and the operation was queued for redelivery.
    Deferred { outbox_id: i64 },
    /// Delivery failed and nothing will retry it.
    Failed,
    /// No secondary store is configured.
    Disabled,
    /// The primary write was a no-op, so there was nothing to mirror.
    Skipped,
}

impl MirrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mirrored => "mirrored",
            Self::Deferred { .. } => "deferred",
            Self::Failed => "failed",
            Self::Disabled => "disabled",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Primary-assigned identifier. Secondary ids are never surfaced.
    pub primary_id: String,
    pub mirror: MirrorStatus,
}

/// Redelivery schedule for the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before the next try after `attempts` failed ones: `base * 2^(attempts-1)`, capped.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.retried == 0 && self.dead == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Channel;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(policy.delay(4), Duration::from_secs(40));
        assert_eq!(policy.delay(5), Duration::from_secs(60));
        assert_eq!(policy.delay(200), Duration::from_secs(60));
    }

    #[test]
    fn mirror_op_payload_is_tagged() {
        let op = MirrorOp::CreateSession {
            primary_id: "p1".into(),
            draft: SessionDraft::new("+550000000", Channel::Chat),
        };
        let payload = serde_json::to_value(&op).unwrap();
        assert_eq!(payload["op"], "create_session");
        assert_eq!(payload["draft"]["channel"], "chat");

        let decoded: MirrorOp = serde_json::from_value(payload).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn session_writes_share_a_serialization_key() {
        let create = WriteOp::CreateSession(SessionDraft::new("+5511", Channel::Chat));
        let other_channel = WriteOp::CreateSession(SessionDraft::new("+5511", Channel::WhatsApp));
        assert_ne!(create.session_key(), other_channel.session_key());

        let message = WriteOp::InsertMessage {
            session_id: SessionId::new("s1"),
            draft: MessageDraft::from_user("+5511", "oi"),
        };
        assert_eq!(message.session_key().as_deref(), Some("s1"));
        assert_eq!(WriteOp::EndSession(SessionId::new("s1")).session_key().as_deref(), Some("s1"));
    }

    #[test]
    fn activity_writes_share_the_key_of_their_create() {
        let draft = crate::activity::ActivityInput::new("2024-03-10", "Corrida", "fitness")
            .into_draft()
            .unwrap();
        let match_key = draft.natural_key();
        let create = MirrorOp::CreateActivity {
            primary_id: "a1".into(),
            draft,
        };
        let delete = WriteOp::DeleteActivity {
            id: ActivityId::new("a1"),
            match_key: match_key.clone(),
        };
        let mirrored_delete = MirrorOp::DeleteActivity {
            primary_id: "a1".into(),
            match_key,
        };

        assert_eq!(create.session_key().as_deref(), Some("activity:a1"));
        assert_eq!(delete.session_key(), create.session_key());
        assert_eq!(mirrored_delete.session_key(), create.session_key());
    }
}
