//! Room-scoped sessions: JSONL persistence, token accounting, and
//! compaction for long conversations.

pub mod compactor;
pub mod store;
pub mod tokens;

pub use compactor::{CompactionConfig, CompactionMode, CompactionResult, SessionCompactor};
pub use store::SessionStore;
pub use tokens::{count_messages, count_text};
