//! REST mirror store reached over a PostgREST-style HTTP API.
//!
//! The mirror assigns its own identifiers. Rows are returned with
//! `Prefer: return=representation` so inserts and updates report the ids
//! they touched.

pub mod codec;

use self::codec::{
    natural_key_filters, RemoteActivity, RemoteActivityPatch, RemoteMessage, RemoteSession, ReturnedRow,
};
use super::{ActivityTarget, SessionInsert, StoreAdapter};
use crate::config::SecondaryConfig;
use crate::model::{ActivityDraft, ActivityPatch, Channel, MessageDraft, MessageReceipt, SessionDraft};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RestMirror {
    client: Client,
    base_url: String,
    api_key: String,
    sessions_table: String,
    messages_table: String,
    activities_table: String,
}

impl RestMirror {
    pub fn new(config: &SecondaryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build secondary HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            sessions_table: config.sessions_table.clone(),
            messages_table: config.messages_table.clone(),
            activities_table: config.activities_table.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
    }

    /// Sends the request and decodes the returned rows.
    async fn rows(&self, operation: &str, request: RequestBuilder) -> Result<Vec<ReturnedRow>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("secondary {} request failed", operation))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("Secondary {} response status: {}", operation, status);

        if !status.is_success() {
            anyhow::bail!("secondary {} rejected ({}): {}", operation, status, body);
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).with_context(|| format!("Failed to parse secondary {} response", operation))
    }

    fn activity_filters(target: &ActivityTarget) -> Vec<(&'static str, String)> {
        match target {
            ActivityTarget::Id(id) => vec![("id", format!("eq.{}", id))],
            ActivityTarget::NaturalKey(key) => natural_key_filters(key),
        }
    }
}

#[async_trait]
impl StoreAdapter for RestMirror {
    fn label(&self) -> &'static str {
        "secondary"
    }

    async fn find_active_session(&self, contact_identity: &str, channel: Channel) -> Result<Option<String>> {
        let request = self.request(Method::GET, &self.sessions_table).query(&[
            ("select", "id".to_string()),
            ("contact_phone", format!("eq.{}", contact_identity)),
            ("channel", format!("eq.{}", channel.as_str())),
            ("status", "eq.active".to_string()),
            ("order", "updated_at.desc".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows = self.rows("find_active_session", request).await?;
        Ok(rows.first().map(ReturnedRow::id_text))
    }

    async fn insert_session(&self, draft: &SessionDraft) -> Result<SessionInsert> {
        if let Some(id) = self.find_active_session(&draft.contact_identity, draft.channel).await? {
            return Ok(SessionInsert { id, created: false });
        }

        let request = self
            .request(Method::POST, &self.sessions_table)
            .json(&RemoteSession::from(draft));
        let rows = self.rows("insert_session", request).await?;
        let id = rows
            .first()
            .map(ReturnedRow::id_text)
            .context("secondary returned no session row")?;
        Ok(SessionInsert { id, created: true })
    }

    async fn end_session(&self, session_ref: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let request = self
            .request(Method::PATCH, &self.sessions_table)
            .query(&[("id", format!("eq.{}", session_ref)), ("status", "eq.active".to_string())])
            .json(&json!({ "status": "ended", "updated_at": now }));
        let rows = self.rows("end_session", request).await?;
        Ok(!rows.is_empty())
    }

    async fn insert_message(&self, session_ref: &str, draft: &MessageDraft) -> Result<MessageReceipt> {
        let request = self
            .request(Method::POST, &self.messages_table)
            .json(&RemoteMessage::new(session_ref, draft));
        let rows = self.rows("insert_message", request).await?;
        let row = rows.first().context("secondary returned no message row")?;
        let created_at = row
            .created_at()
            .or(draft.created_at)
            .unwrap_or_else(Utc::now);

        let touch = self
            .request(Method::PATCH, &self.sessions_table)
            .query(&[("id", format!("eq.{}", session_ref))])
            .json(&json!({ "updated_at": created_at.to_rfc3339_opts(SecondsFormat::Micros, true) }));
        if let Err(e) = self.rows("touch_session", touch).await {
            warn!(session_ref, error = %e, "Failed to bump secondary session updated_at");
        }

        Ok(MessageReceipt {
            id: row.id_text(),
            sequence: 0,
            created_at,
        })
    }

    async fn insert_activity(&self, draft: &ActivityDraft) -> Result<String> {
        let request = self
            .request(Method::POST, &self.activities_table)
            .json(&RemoteActivity::from(draft));
        let rows = self.rows("insert_activity", request).await?;
        rows.first()
            .map(ReturnedRow::id_text)
            .context("secondary returned no activity row")
    }

    async fn update_activity(&self, target: &ActivityTarget, patch: &ActivityPatch) -> Result<Option<String>> {
        let request = self
            .request(Method::PATCH, &self.activities_table)
            .query(&Self::activity_filters(target))
            .json(&RemoteActivityPatch::from(patch));
        let rows = self.rows("update_activity", request).await?;
        if rows.len() > 1 {
            warn!("Secondary activity update matched {} rows", rows.len());
        }
        Ok(rows.first().map(ReturnedRow::id_text))
    }

    async fn delete_activity(&self, target: &ActivityTarget) -> Result<bool> {
        let request = self
            .request(Method::DELETE, &self.activities_table)
            .query(&Self::activity_filters(target));
        let rows = self.rows("delete_activity", request).await?;
        Ok(!rows.is_empty())
    }
}
