pub mod activity;
pub mod session;

pub use activity::{
    ActivityDraft, ActivityPatch, ActivityStatus, Category, NaturalKey, ScheduledActivity,
};
pub use session::{
    ActivityId, Channel, ContactSession, ConversationTurn, Message, MessageDraft, MessageId,
    MessageKind, MessageReceipt, SessionDraft, SessionId, SessionState, SessionStats, TurnRole,
};
