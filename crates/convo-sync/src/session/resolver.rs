//! Find-or-create of the active session for a contact on a channel.

use crate::error::SyncError;
use crate::model::{Channel, ContactSession, SessionDraft, SessionId, SessionStats};
use crate::sync::{DualWriteCoordinator, WriteOp};
use std::sync::Arc;
use tracing::{debug, info};

pub struct SessionResolver {
    coordinator: Arc<DualWriteCoordinator>,
}

impl SessionResolver {
    pub fn new(coordinator: Arc<DualWriteCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Returns the active session for `(contact, channel)`, creating one if needed.
    ///
    /// Repeat contacts keep their original display name and avatar. A contact
    /// whose previous session ended always gets a new one.
    pub async fn resolve(
        &self,
        contact_identity: &str,
        channel: Channel,
        display_name: Option<&str>,
        avatar_ref: Option<&str>,
    ) -> Result<SessionId, SyncError> {
        let contact_identity = contact_identity.trim();
        if contact_identity.is_empty() {
            return Err(SyncError::Validation("contact identity is required".to_string()));
        }

        let primary = self.coordinator.primary();
        if let Some(id) = self
            .coordinator
            .read_primary("find_active_session", primary.find_active_session(contact_identity, channel))
            .await?
        {
            debug!(session_id = %id, channel = %channel, "reusing active session");
            return Ok(SessionId::new(id));
        }

        let draft = SessionDraft::new(contact_identity, channel)
            .with_display_name(display_name)
            .with_avatar(avatar_ref);
        let outcome = self.coordinator.apply(WriteOp::CreateSession(draft)).await?;
        info!(
            session_id = %outcome.primary_id,
            channel = %channel,
            mirror = outcome.mirror.as_str(),
            "session resolved"
        );
        Ok(SessionId::new(outcome.primary_id))
    }

    /// Ends an active session. Ending an already ended session is a no-op.
    pub async fn end(&self, session_id: &SessionId) -> Result<(), SyncError> {
        self.coordinator.apply(WriteOp::EndSession(session_id.clone())).await?;
        Ok(())
    }

    pub async fn contact_sessions(
        &self,
        contact_identity: &str,
        channel: Option<Channel>,
    ) -> Result<Vec<ContactSession>, SyncError> {
        let primary = self.coordinator.primary();
        self.coordinator
            .read_primary("contact_sessions", primary.contact_sessions(contact_identity, channel))
            .await
    }

    pub async fn active_sessions(&self, limit: u32) -> Result<Vec<ContactSession>, SyncError> {
        let primary = self.coordinator.primary();
        self.coordinator
            .read_primary("active_sessions", primary.active_sessions(limit))
            .await
    }

    pub async fn stats(&self) -> Result<SessionStats, SyncError> {
        let primary = self.coordinator.primary();
        self.coordinator.read_primary("session_stats", primary.session_stats()).await
    }
}
