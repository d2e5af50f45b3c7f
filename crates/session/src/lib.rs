//! Session state for Glimpse: the append-only conversation log, the stores
//! it persists through, and the session-wide image identifier counter.

pub mod ids;
pub mod log;
pub mod store;

pub use ids::ImageIdAllocator;
pub use log::{ConversationLog, HistoryMode};
pub use store::{FileLogStore, LogStore, NoopLogStore};
