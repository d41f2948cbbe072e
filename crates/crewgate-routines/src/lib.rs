//! Periodic self-invocations per bot ("team routines" / heartbeats).

pub mod service;
pub mod types;

pub use service::{RoutineRunner, RoutineService};
pub use types::{RoutineConfig, RoutineJob, TickRecord};
