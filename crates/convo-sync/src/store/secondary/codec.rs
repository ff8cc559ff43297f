//! Row encodings understood by the mirror's REST tables.

use crate::model::{ActivityDraft, ActivityPatch, MessageDraft, NaturalKey, SessionDraft};
use crate::store::primary::activity_store::{encode_date, encode_time};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Serialize)]
pub struct RemoteSession<'a> {
    pub contact_phone: &'a str,
    pub contact_name: &'a str,
    pub contact_avatar: Option<&'a str>,
    pub channel: &'a str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl<'a> From<&'a SessionDraft> for RemoteSession<'a> {
    fn from(draft: &'a SessionDraft) -> Self {
        Self {
            contact_phone: &draft.contact_identity,
            contact_name: &draft.display_name,
            contact_avatar: draft.avatar_ref.as_deref(),
            channel: draft.channel.as_str(),
            status: "active",
            created_at: draft.created_at.map(rfc3339),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RemoteMessage<'a> {
    pub chat_session_id: &'a str,
    pub sender_phone: &'a str,
    pub sender_name: Option<&'a str>,
    pub content: &'a str,
    pub message_type: &'static str,
    pub media_url: Option<&'a str>,
    pub is_from_bot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl<'a> RemoteMessage<'a> {
    pub fn new(session_ref: &'a str, draft: &'a MessageDraft) -> Self {
        Self {
            chat_session_id: session_ref,
            sender_phone: &draft.sender_identity,
            sender_name: draft.sender_display_name.as_deref(),
            content: &draft.content,
            message_type: draft.kind.as_str(),
            media_url: draft.media_ref.as_deref(),
            is_from_bot: draft.is_from_agent,
            created_at: draft.created_at.map(rfc3339),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RemoteActivity<'a> {
    pub activity: &'a str,
    pub category: &'static str,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub status: &'static str,
    pub has_images: bool,
    pub has_videos: bool,
}

impl<'a> From<&'a ActivityDraft> for RemoteActivity<'a> {
    fn from(draft: &'a ActivityDraft) -> Self {
        Self {
            activity: &draft.activity,
            category: draft.category.as_str(),
            date: encode_date(draft.date),
            time_start: encode_time(draft.time_start),
            time_end: encode_time(draft.time_end),
            description: draft.description.as_deref(),
            location: draft.location.as_deref(),
            status: draft.status.as_str(),
            has_images: draft.has_images,
            has_videos: draft.has_videos,
        }
    }
}

/// Only the fields the caller changed are sent.
#[derive(Debug, Default, Serialize)]
pub struct RemoteActivityPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_videos: Option<bool>,
}

impl<'a> From<&'a ActivityPatch> for RemoteActivityPatch<'a> {
    fn from(patch: &'a ActivityPatch) -> Self {
        Self {
            activity: patch.activity.as_deref(),
            category: patch.category.map(|c| c.as_str()),
            date: patch.date.map(encode_date),
            time_start: patch.time_start.map(encode_time),
            time_end: patch.time_end.map(encode_time),
            description: patch.description.as_deref(),
            location: patch.location.as_deref(),
            status: patch.status.map(|s| s.as_str()),
            has_images: patch.has_images,
            has_videos: patch.has_videos,
        }
    }
}

/// `eq.` filters selecting rows by natural key.
pub fn natural_key_filters(key: &NaturalKey) -> Vec<(&'static str, String)> {
    vec![
        ("date", format!("eq.{}", encode_date(key.date))),
        ("time_start", format!("eq.{}", encode_time(key.time_start))),
        ("activity", format!("eq.{}", key.activity)),
        ("category", format!("eq.{}", key.category.as_str())),
    ]
}

#[derive(Debug, Deserialize)]
pub struct ReturnedRow {
    pub id: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ReturnedRow {
    /// Mirror tables use integer or uuid keys; both are carried as text.
    pub fn id_text(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}
