//! Admin-facing activity writes routed through the dual-write coordinator.

pub mod input;
pub mod service;

pub use input::{ActivityChanges, ActivityInput};
pub use service::ActivitySyncService;
