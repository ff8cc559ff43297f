//! Errors surfaced to callers of the synchronization layer.
//!
//! Store adapters report failures as `anyhow::Error` with context. Only
//! Primary failures cross this boundary; Secondary failures are logged and
//! reported through [`crate::sync::MirrorStatus`].

use crate::model::{ActivityId, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The authoritative store failed or timed out. No mirror was attempted.
    #[error("primary store unavailable during {operation}: {source:#}")]
    PrimaryUnavailable {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Input was rejected before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("activity not found: {0}")]
    ActivityNotFound(ActivityId),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    pub fn primary(operation: &'static str, source: anyhow::Error) -> Self {
        Self::PrimaryUnavailable { operation, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::ActivityNotFound(_))
    }
}

impl From<validator::ValidationErrors> for SyncError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
