//! Conversation records: contact sessions, messages and replayed turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Primary-assigned identifier of a contact session.
    SessionId
);
string_id!(
    /// Primary-assigned identifier of a message.
    MessageId
);
string_id!(
    /// Primary-assigned identifier of a scheduled activity.
    ActivityId
);

/// Transport a contact reached the agent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Web chat widget.
    Chat,
    /// Messaging channel webhook.
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Chat, Channel::WhatsApp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::WhatsApp => "whatsapp",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" | "web" => Some(Self::Chat),
            "whatsapp" => Some(Self::WhatsApp),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Ended,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// One logical conversation thread between a contact and the agent on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSession {
    pub id: SessionId,
    pub contact_identity: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub channel: Channel,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactSession {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// A session that has not been written to any store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDraft {
    pub contact_identity: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub channel: Channel,
    /// Stores that assign their own timestamps ignore this.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionDraft {
    /// The display name falls back to the contact identity.
    pub fn new(contact_identity: impl Into<String>, channel: Channel) -> Self {
        let contact_identity = contact_identity.into();
        Self {
            display_name: contact_identity.clone(),
            contact_identity,
            avatar_ref: None,
            channel,
            created_at: None,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<&str>) -> Self {
        if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
            self.display_name = name.to_string();
        }
        self
    }

    pub fn with_avatar(mut self, avatar_ref: Option<&str>) -> Self {
        self.avatar_ref = avatar_ref.map(str::to_string);
        self
    }
}

impl From<&ContactSession> for SessionDraft {
    fn from(session: &ContactSession) -> Self {
        Self {
            contact_identity: session.contact_identity.clone(),
            display_name: session.display_name.clone(),
            avatar_ref: session.avatar_ref.clone(),
            channel: session.channel,
            created_at: Some(session.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

/// A message that has not been written to any store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub sender_identity: String,
    pub sender_display_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
    pub is_from_agent: bool,
    /// Set to the Primary-assigned timestamp before the message is mirrored.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageDraft {
    pub fn text(sender_identity: impl Into<String>, content: impl Into<String>, is_from_agent: bool) -> Self {
        Self {
            sender_identity: sender_identity.into(),
            sender_display_name: None,
            content: content.into(),
            kind: MessageKind::Text,
            media_ref: None,
            is_from_agent,
            created_at: None,
        }
    }

    pub fn from_user(sender_identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self::text(sender_identity, content, false)
    }

    pub fn from_agent(sender_identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self::text(sender_identity, content, true)
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_display_name = Some(name.into());
        self
    }

    pub fn with_media(mut self, kind: MessageKind, media_ref: impl Into<String>) -> Self {
        self.kind = kind;
        self.media_ref = Some(media_ref.into());
        self
    }
}

/// An immutable turn stored under a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    /// Per-session position, assigned by the Primary store.
    pub sequence: i64,
    pub sender_identity: String,
    pub sender_display_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
    pub is_from_agent: bool,
    pub created_at: DateTime<Utc>,
}

/// What a store hands back after accepting a message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageReceipt {
    pub id: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// A role-tagged turn ready to be injected into an agent's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl From<&Message> for ConversationTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: if message.is_from_agent { TurnRole::Agent } else { TurnRole::User },
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub active_sessions: i64,
    pub chat_sessions: i64,
    pub whatsapp_sessions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_uuids() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn channel_round_trips_through_wire_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_str_opt(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::from_str_opt(" WhatsApp "), Some(Channel::WhatsApp));
        assert_eq!(Channel::from_str_opt("sms"), None);
    }

    #[test]
    fn session_draft_defaults_display_name_to_contact() {
        let draft = SessionDraft::new("+550000000", Channel::Chat);
        assert_eq!(draft.display_name, "+550000000");

        let named = SessionDraft::new("+550000000", Channel::Chat).with_display_name(Some("  Ana "));
        assert_eq!(named.display_name, "Ana");

        let blank = SessionDraft::new("+550000000", Channel::Chat).with_display_name(Some("   "));
        assert_eq!(blank.display_name, "+550000000");
    }

    #[test]
    fn turn_role_follows_agent_flag() {
        let message = Message {
            id: MessageId::new("m1"),
            session_id: SessionId::new("s1"),
            sequence: 1,
            sender_identity: "agent".into(),
            sender_display_name: None,
            content: "Olá!".into(),
            kind: MessageKind::Text,
            media_ref: None,
            is_from_agent: true,
            created_at: Utc::now(),
        };
        let turn = ConversationTurn::from(&message);
        assert_eq!(turn.role, TurnRole::Agent);
        assert_eq!(turn.content, "Olá!");
    }

    #[test]
    fn channel_serializes_to_wire_name() {
        let json = serde_json::to_string(&Channel::WhatsApp).unwrap();
        assert_eq!(json, "\"whatsapp\"");
    }
}
