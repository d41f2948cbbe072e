//! Core building blocks for Crewgate: chat message types, the message bus
//! and per-room brokers, durable rooms and tasks, sessions with compaction,
//! and the configuration schema/loader.

pub mod bus;
pub mod config;
pub mod rooms;
pub mod session;
pub mod types;
pub mod utils;
