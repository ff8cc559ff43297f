//! Rebuilds the recent conversation for a contact as role-tagged turns.

use crate::error::SyncError;
use crate::model::{Channel, ConversationTurn};
use crate::sync::DualWriteCoordinator;
use std::sync::Arc;
use tracing::debug;

pub struct HistoryReplayer {
    coordinator: Arc<DualWriteCoordinator>,
    default_limit: u32,
}

impl HistoryReplayer {
    pub fn new(coordinator: Arc<DualWriteCoordinator>, default_limit: u32) -> Self {
        Self {
            coordinator,
            default_limit,
        }
    }

    /// The last `limit` turns of the contact's most recently updated session on
    /// `channel`, oldest first. Reads the primary store only and caches nothing.
    ///
    /// A contact with no session yields an empty history.
    pub async fn replay(
        &self,
        contact_identity: &str,
        channel: Channel,
        limit: u32,
    ) -> Result<Vec<ConversationTurn>, SyncError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let primary = self.coordinator.primary();
        let sessions = self
            .coordinator
            .read_primary("replay", primary.contact_sessions(contact_identity, Some(channel)))
            .await?;
        let Some(session) = sessions.into_iter().next() else {
            debug!(channel = %channel, "no prior session, empty history");
            return Ok(Vec::new());
        };

        let messages = self
            .coordinator
            .read_primary("replay", primary.recent_messages(&session.id, limit))
            .await?;
        let turns: Vec<ConversationTurn> = messages.iter().map(ConversationTurn::from).collect();

        if let Some(metrics) = self.coordinator.metrics() {
            metrics.add_replayed_turns(turns.len());
        }
        debug!(session_id = %session.id, turns = turns.len(), "history replayed");
        Ok(turns)
    }

    pub async fn replay_default(&self, contact_identity: &str, channel: Channel) -> Result<Vec<ConversationTurn>, SyncError> {
        self.replay(contact_identity, channel, self.default_limit).await
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }
}
