//! The message envelope — a single inbound or outbound unit in transit.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel label used by asynchronous announcements (invoker results,
/// routine ticks). System envelopes encode their origin conversation in
/// `chat_id` as `"<origin_channel>:<origin_chat_id>"`.
pub const SYSTEM_CHANNEL: &str = "system";

/// Direction of travel through the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Who authored the content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Assistant,
    System,
}

/// A single message in transit between a channel and the agent loop.
///
/// `room_id` may be empty on a freshly published inbound envelope; the broker
/// resolves it before processing, so every envelope past ingestion carries a
/// non-empty room id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Origin (inbound) or destination (outbound) channel label.
    pub channel: String,
    /// Channel-scoped conversation id.
    pub chat_id: String,
    /// Global room id. Normalized by the broker on ingestion.
    #[serde(default)]
    pub room_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub direction: Direction,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageEnvelope {
    /// A user message arriving from a channel. `room_id` starts empty and is
    /// filled in by the broker.
    pub fn inbound(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageEnvelope {
            channel: channel.into(),
            chat_id: chat_id.into(),
            room_id: String::new(),
            sender_id: sender_id.into(),
            sender_role: SenderRole::User,
            direction: Direction::Inbound,
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A reply heading back out to a channel.
    pub fn outbound(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        room_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageEnvelope {
            channel: channel.into(),
            chat_id: chat_id.into(),
            room_id: room_id.into(),
            sender_id: "assistant".into(),
            sender_role: SenderRole::Assistant,
            direction: Direction::Outbound,
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// An announcement from a background task (invoker result, routine tick),
    /// targeted back at the originating conversation.
    pub fn system_announcement(
        sender_id: impl Into<String>,
        origin_channel: &str,
        origin_chat_id: &str,
        room_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageEnvelope {
            channel: SYSTEM_CHANNEL.into(),
            chat_id: format!("{origin_channel}:{origin_chat_id}"),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            sender_role: SenderRole::System,
            direction: Direction::Inbound,
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.channel == SYSTEM_CHANNEL
    }

    /// Split a system envelope's `chat_id` back into its origin pair.
    pub fn origin(&self) -> Option<(&str, &str)> {
        self.chat_id.split_once(':')
    }

    /// Attach a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
