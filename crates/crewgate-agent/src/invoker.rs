//! Asynchronous bot delegation.
//!
//! `invoke` launches a specialist bot on a subtask in the background and
//! returns immediately with a short confirmation. The background task runs
//! a bounded LLM ↔ tool loop with that bot's persona and a narrowed tool
//! registry, then announces the result on the system channel so the leader
//! can summarize it back to the originating conversation. Invocations are
//! tracked per room so `/stop` can cancel them; a cancelled invocation
//! never publishes its announcement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crewgate_core::bus::{Bus, MessageEnvelope};
use crewgate_core::types::ChatMessage;
use crewgate_providers::{LlmProvider, LlmRequestConfig};
use crewgate_security::{AuditLog, KeyVault};

use crate::context::ContextBuilder;
use crate::identity::IdentityStore;
use crate::tools::filesystem::{ListDirTool, PathPolicy, ReadFileTool, WriteFileTool};
use crate::tools::permissions::permissions_for_bot;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};
use crate::tools::ToolRegistry;

/// Iteration cap for a delegated task's loop.
const INVOKER_MAX_ITERATIONS: usize = 10;

struct Invocation {
    id: String,
    bot: String,
    cancelled: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Launches and tracks delegated bot runs.
pub struct BotInvoker {
    provider: Arc<dyn LlmProvider>,
    identities: IdentityStore,
    path_policy: Arc<PathPolicy>,
    bus: Arc<Bus>,
    vault: Arc<KeyVault>,
    audit: Arc<AuditLog>,
    model: String,
    request_config: LlmRequestConfig,
    /// Specialists that may be invoked; the leader is never a target.
    known_bots: Vec<String>,
    web_key_ref: Option<String>,
    exec_timeout_s: u64,
    /// room_id → live invocations.
    running: Mutex<HashMap<String, Vec<Invocation>>>,
}

impl BotInvoker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        identities: IdentityStore,
        path_policy: Arc<PathPolicy>,
        bus: Arc<Bus>,
        vault: Arc<KeyVault>,
        audit: Arc<AuditLog>,
        model: String,
        request_config: LlmRequestConfig,
        known_bots: Vec<String>,
        web_key_ref: Option<String>,
        exec_timeout_s: u64,
    ) -> Self {
        Self {
            provider,
            identities,
            path_policy,
            bus,
            vault,
            audit,
            model,
            request_config,
            known_bots,
            web_key_ref,
            exec_timeout_s,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Delegate a task. Returns the immediate confirmation text (or a
    /// refusal when the target is invalid).
    pub async fn invoke(
        self: &Arc<Self>,
        bot: &str,
        task: &str,
        context: Option<&str>,
        origin_channel: &str,
        origin_chat_id: &str,
        origin_room_id: &str,
    ) -> String {
        let bot = bot.trim_start_matches('@').to_lowercase();
        if bot == "leader" {
            return "The leader can't delegate to itself — pick a specialist bot.".into();
        }
        if !self.known_bots.iter().any(|b| b.eq_ignore_ascii_case(&bot)) {
            return format!(
                "Unknown bot '@{bot}'. Available specialists: {}.",
                self.known_bots.join(", ")
            );
        }

        let identity = self.identities.load(&bot);
        if let Some(ban) = identity.role_card.violates_hard_ban(task) {
            self.audit.log_tool(
                "invoke",
                "",
                false,
                0,
                Some(origin_room_id),
                Some(&format!("hard ban: {ban}")),
            );
            return format!("@{bot} refused the task: it violates a hard ban ({ban}).");
        }

        let invocation_id = short_id();
        let cancelled = Arc::new(AtomicBool::new(false));

        self.audit.log_tool(
            &format!("invoke.{bot}"),
            "",
            true,
            0,
            Some(origin_room_id),
            None,
        );

        // The task waits on this gate until its invocation is registered,
        // so a fast completion can't race the bookkeeping below.
        let start_gate = Arc::new(tokio::sync::Notify::new());

        let invoker = Arc::clone(self);
        let handle = {
            let bot = bot.clone();
            let task = task.to_string();
            let context = context.map(str::to_string);
            let origin_channel = origin_channel.to_string();
            let origin_chat_id = origin_chat_id.to_string();
            let origin_room_id = origin_room_id.to_string();
            let invocation_id = invocation_id.clone();
            let cancelled = cancelled.clone();
            let start_gate = start_gate.clone();

            tokio::spawn(async move {
                start_gate.notified().await;
                let result = invoker.run_bot(&bot, &task, context.as_deref()).await;

                if cancelled.load(Ordering::SeqCst) {
                    info!(bot = %bot, invocation = %invocation_id, "invocation cancelled, dropping result");
                } else {
                    let content = match &result {
                        Ok(text) => format!(
                            "## Delegated Task Result\n**Bot**: @{bot}\n**Task**: {task}\n\n{text}\n\n---\n\
                             *Summarize this naturally for the user. Keep it brief; don't mention task ids.*"
                        ),
                        Err(e) => {
                            error!(bot = %bot, error = %e, "delegated task failed");
                            format!(
                                "## Delegated Task Result\n**Bot**: @{bot}\n**Task**: {task}\n\n\
                                 The task failed: {e}\n\n---\n\
                                 *Let the user know briefly and suggest a next step.*"
                            )
                        }
                    };
                    let env = MessageEnvelope::system_announcement(
                        &bot,
                        &origin_channel,
                        &origin_chat_id,
                        &origin_room_id,
                        content,
                    );
                    if let Err(e) = invoker.bus.publish_inbound(env).await {
                        error!(bot = %bot, error = %e, "failed to announce delegation result");
                    }
                    invoker.audit.log_tool(
                        &format!("invoke.{bot}.complete"),
                        "",
                        result.is_ok(),
                        0,
                        Some(&origin_room_id),
                        result.as_ref().err().map(|e| e.to_string()).as_deref(),
                    );
                }

                invoker.forget(&origin_room_id, &invocation_id).await;
            })
        };

        {
            let mut running = self.running.lock().await;
            running.entry(origin_room_id.to_string()).or_default().push(Invocation {
                id: invocation_id,
                bot: bot.clone(),
                cancelled,
                handle,
            });
        }
        start_gate.notify_one();

        format!("@{bot} is on it — I'll report back here when the task completes.")
    }

    /// The delegated bot's bounded LLM ↔ tool loop.
    async fn run_bot(&self, bot: &str, task: &str, context: Option<&str>) -> anyhow::Result<String> {
        info!(bot = %bot, "delegated task starting");

        let registry = self.build_registry(bot);
        let system_prompt = self.build_prompt(bot, task, context);
        let mut messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(task)];
        let tool_defs = registry.definitions();

        let mut final_content: Option<String> = None;
        for iteration in 0..INVOKER_MAX_ITERATIONS {
            let response = self
                .provider
                .chat(&messages, Some(&tool_defs), &self.model, &self.request_config)
                .await;

            if !response.has_tool_calls() {
                final_content = response.content;
                break;
            }

            let tool_calls = response.tool_calls.clone();
            ContextBuilder::add_assistant_message(&mut messages, response.content, tool_calls.clone());

            for call in &tool_calls {
                let params: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                debug!(bot = %bot, tool = %call.function.name, iteration, "delegated tool call");
                let result = registry.execute(&call.function.name, params).await;
                ContextBuilder::add_tool_result(&mut messages, &call.id, &result);
            }
        }

        Ok(final_content
            .unwrap_or_else(|| "The task finished but produced no summary.".into()))
    }

    /// The delegated bot's registry: filesystem/web/shell as its
    /// capabilities and permission sections allow. Never message or invoke
    /// — results flow back through the announcement.
    fn build_registry(&self, bot: &str) -> ToolRegistry {
        let identity = self.identities.load(bot);
        let perms = permissions_for_bot(identity.soul.as_deref(), identity.agents_md.as_deref());
        let registry = ToolRegistry::with_permissions(perms);

        registry.register(Arc::new(ReadFileTool::new(self.path_policy.clone())));
        registry.register(Arc::new(WriteFileTool::new(self.path_policy.clone())));
        registry.register(Arc::new(ListDirTool::new(self.path_policy.clone())));
        if identity.role_card.capabilities.can_exec_commands {
            registry.register(Arc::new(ExecTool::new(
                self.path_policy.clone(),
                Some(self.exec_timeout_s),
            )));
        }
        if identity.role_card.capabilities.can_access_web {
            registry.register(Arc::new(WebSearchTool::new(
                self.web_key_ref.clone(),
                self.vault.clone(),
            )));
            registry.register(Arc::new(WebFetchTool::new()));
        }
        registry
    }

    fn build_prompt(&self, bot: &str, task: &str, context: Option<&str>) -> String {
        let persona = self
            .identities
            .persona(bot)
            .unwrap_or_else(|| format!("You are {bot}, a specialist bot."));
        let context_block = context
            .map(|c| format!("\n\n## Context from the room\n{c}"))
            .unwrap_or_default();

        format!(
            "# Delegated Task\n\n{persona}\n\n\
             You were delegated a specific task by the leader.{context_block}\n\n\
             ## Your Task\n{task}\n\n\
             ## Rules\n\
             1. Stay on the assigned task; no side quests\n\
             2. Your final message is reported back to the leader, who summarizes it for the user\n\
             3. Be concise but complete\n\
             4. You cannot message users directly or delegate further"
        )
    }

    /// Run one routine check through the bot's filtered registry, without
    /// an announcement. The routine service's runner calls this.
    pub async fn run_check(&self, bot: &str, check: &str) -> anyhow::Result<String> {
        self.run_bot(
            bot,
            &format!("Run your periodic check '{check}' and report the outcome in one short paragraph."),
            None,
        )
        .await
    }

    /// Cancel every live invocation for a room. The tasks' results are
    /// discarded; announcements never publish. Returns how many were
    /// cancelled.
    pub async fn cancel_room(&self, room_id: &str) -> usize {
        let mut running = self.running.lock().await;
        let Some(invocations) = running.remove(room_id) else {
            return 0;
        };
        let count = invocations.len();
        for invocation in invocations {
            invocation.cancelled.store(true, Ordering::SeqCst);
            invocation.handle.abort();
            info!(bot = %invocation.bot, invocation = %invocation.id, room_id = %room_id, "invocation cancelled");
        }
        count
    }

    pub async fn active_count(&self, room_id: &str) -> usize {
        let running = self.running.lock().await;
        running.get(room_id).map_or(0, Vec::len)
    }

    async fn forget(&self, room_id: &str, invocation_id: &str) {
        let mut running = self.running.lock().await;
        if let Some(invocations) = running.get_mut(room_id) {
            invocations.retain(|i| i.id != invocation_id);
            if invocations.is_empty() {
                running.remove(room_id);
            }
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
