//! Durable rooms: the conversation contexts bots live in, their tasks, and
//! the channel ↔ room mapping table.

pub mod manager;
pub mod room;

pub use manager::RoomManager;
pub use room::{Handoff, Room, RoomTask, RoomType, TaskPriority, TaskStatus};
