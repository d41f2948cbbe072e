//! The tool subsystem: the `Tool` trait, the registry with per-bot
//! permission filtering, and the built-in tools.

pub mod base;
pub mod filesystem;
pub mod invoke;
pub mod mcp;
pub mod message;
pub mod permissions;
pub mod registry;
pub mod room_task;
pub mod routine;
pub mod shell;
pub mod web;

pub use base::Tool;
pub use filesystem::PathPolicy;
pub use permissions::ToolPermissions;
pub use registry::ToolRegistry;
