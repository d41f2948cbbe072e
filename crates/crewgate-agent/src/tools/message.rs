//! Message tool — proactive outbound sends.
//!
//! Besides delivering the message, the tool records that something was sent
//! in the current turn so the loop can suppress its duplicate auto-reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crewgate_core::bus::{Bus, MessageEnvelope};

use super::base::{optional_string, require_string, Tool};

pub struct MessageTool {
    bus: Option<Arc<Bus>>,
    /// Default destination, set per-turn by the loop.
    context: Mutex<(String, String, String)>, // (channel, chat_id, room_id)
    /// Raised when a send happened this turn; the loop reads and resets it.
    sent_in_turn: AtomicBool,
}

impl MessageTool {
    pub fn new(bus: Option<Arc<Bus>>) -> Self {
        Self {
            bus,
            context: Mutex::new(("cli".into(), "direct".into(), String::new())),
            sent_in_turn: AtomicBool::new(false),
        }
    }

    /// Point the tool at the current conversation and clear the
    /// sent-in-turn flag. Called by the loop before each inbound.
    pub async fn set_context(&self, channel: &str, chat_id: &str, room_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string(), room_id.to_string());
        self.sent_in_turn.store(false, Ordering::SeqCst);
    }

    /// Whether a message already went out during this turn.
    pub fn sent_in_turn(&self) -> bool {
        self.sent_in_turn.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel. Defaults to the current conversation; \
         pass channel and chat_id to send elsewhere."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The message content to send" },
                "channel": { "type": "string", "description": "Target channel (optional)" },
                "chat_id": { "type": "string", "description": "Target chat ID (optional)" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let param_channel = optional_string(&params, "channel");
        let param_chat_id = optional_string(&params, "chat_id");

        let (default_channel, default_chat, room_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };
        let channel = param_channel.unwrap_or(default_channel);
        let chat_id = param_chat_id.unwrap_or(default_chat);

        debug!(channel = %channel, chat_id = %chat_id, "sending message via tool");

        if let Some(bus) = &self.bus {
            let env = MessageEnvelope::outbound(&channel, &chat_id, &room_id, &content);
            bus.publish_outbound(env)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to send message: {e}"))?;
        } else {
            debug!("no bus wired, message discarded");
        }

        self.sent_in_turn.store(true, Ordering::SeqCst);
        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
