//! Message bus: envelopes, the inbound/outbound queues, per-room brokers,
//! and the contract channel adapters implement.

pub mod broker;
pub mod envelope;
pub mod queue;

pub use broker::{RoomBroker, RoomBrokerManager, RoomProcessor};
pub use envelope::{Direction, MessageEnvelope, SenderRole};
pub use queue::Bus;

use async_trait::async_trait;

/// Contract every channel adapter fulfills (Telegram, Discord, CLI, …).
///
/// Adapters convert platform messages into inbound envelopes, publish them to
/// the bus, and deliver outbound envelopes addressed to their channel label.
/// Concrete adapters live outside this workspace apart from the CLI REPL.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable channel label, e.g. "telegram", "cli".
    fn channel(&self) -> &str;

    /// Deliver an outbound envelope to the platform.
    async fn deliver(&self, env: &MessageEnvelope) -> anyhow::Result<()>;
}
