//! Dual-store persistence for conversational agents.
//!
//! Sessions, messages and scheduled activities are written to an
//! authoritative SQLite store and mirrored, best effort, to a REST-backed
//! secondary store. Reads (session resolution, history replay) only ever hit
//! the primary.

pub mod activity;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod runtime;
pub mod session;
pub mod store;
pub mod sync;
pub mod telemetry;

// Public API exports
pub use activity::{ActivityChanges, ActivityInput, ActivitySyncService};
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use metrics::Metrics;
pub use model::{
    ActivityId, Channel, ContactSession, ConversationTurn, MessageDraft, MessageId, SessionId, TurnRole,
};
pub use runtime::SyncRuntime;
pub use session::{HistoryReplayer, SessionResolver};
pub use store::{PrimaryStore, RestMirror, SqlitePrimary, StoreAdapter};
pub use sync::{DualWriteCoordinator, MirrorStatus, OutboxDrainer, WriteOp, WriteOutcome, WritePolicy};
