//! Primary-first dual writes, mirror status reporting and the redelivery outbox.

pub mod coordinator;
pub mod ops;
pub mod outbox;

pub use coordinator::{DualWriteCoordinator, WritePolicy};
pub use ops::{ActivityWrite, DrainReport, MirrorOp, MirrorStatus, RetryPolicy, WriteOp, WriteOutcome};
pub use outbox::OutboxDrainer;
