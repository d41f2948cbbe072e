//! Invoke tool — lets the leader delegate a subtask to a specialist bot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_string, require_string, Tool};
use crate::invoker::BotInvoker;

pub struct InvokeTool {
    invoker: Arc<BotInvoker>,
    /// Origin conversation, set per-turn by the loop.
    context: Mutex<(String, String, String)>, // (channel, chat_id, room_id)
}

impl InvokeTool {
    pub fn new(invoker: Arc<BotInvoker>) -> Self {
        Self {
            invoker,
            context: Mutex::new(("cli".into(), "direct".into(), "general".into())),
        }
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str, room_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string(), room_id.to_string());
    }
}

#[async_trait]
impl Tool for InvokeTool {
    fn name(&self) -> &str {
        "invoke"
    }

    fn description(&self) -> &str {
        "Delegate a task to a specialist bot. Runs in the background; the result \
         is announced back to this conversation when done."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bot": { "type": "string", "description": "Specialist bot name, e.g. 'researcher'" },
                "task": { "type": "string", "description": "What the bot should do" },
                "context": { "type": "string", "description": "Relevant room context (optional)" }
            },
            "required": ["bot", "task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let bot = require_string(&params, "bot")?;
        let task = require_string(&params, "task")?;
        let context = optional_string(&params, "context");

        let (channel, chat_id, room_id) = {
            let ctx = self.context.lock().await;
            ctx.clone()
        };

        Ok(self
            .invoker
            .invoke(&bot, &task, context.as_deref(), &channel, &chat_id, &room_id)
            .await)
    }
}
