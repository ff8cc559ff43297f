//! Session resolution and history replay.

pub mod history;
pub mod resolver;

pub use history::HistoryReplayer;
pub use resolver::SessionResolver;
