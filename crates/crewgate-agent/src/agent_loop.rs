//! The agent loop — the per-inbound-message processor.
//!
//! Pipeline, in order: system-message shortcut, configuration gate, slash
//! commands, orchestrator (room creation + multi-bot dispatch), secret
//! conversion, memory append, context assembly, session compaction, model
//! routing, then the bounded LLM ↔ tool iteration, and finalization.
//!
//! Invariants this file owns:
//! - everything written to the session, the audit log, or memory is
//!   sanitized;
//! - concrete secrets never appear in the message list sent to a provider
//!   (symbolic references only; resolution happens inside tool execution);
//! - at most `max_iterations` provider calls per inbound;
//! - a turn always ends in a valid session state, even at the iteration
//!   cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crewgate_core::bus::broker::RoomProcessor;
use crewgate_core::bus::MessageEnvelope;
use crewgate_core::rooms::{Room, RoomManager};
use crewgate_core::session::{count_messages, SessionCompactor, SessionStore};
use crewgate_core::types::{ChatMessage, LlmResponse, ToolCall};
use crewgate_providers::router::{META_CONFIDENCE, META_TIER};
use crewgate_providers::{LlmProvider, LlmRequestConfig, RouteDecision, Router, Tier};
use crewgate_security::{AuditLog, Sanitizer, SecretManager};

use crate::context::{strip_thinking, ContextBuilder};
use crate::dispatch::{detect_room_creation, suggest_bots_for_project, BotDispatch, DispatchTarget};
use crate::invoker::BotInvoker;
use crate::memory::MemoryFacade;
use crate::multi_bot::MultiBotGenerator;
use crate::tools::invoke::InvokeTool;
use crate::tools::message::MessageTool;
use crate::tools::room_task::RoomTaskTool;
use crate::tools::ToolRegistry;

/// Reply when the loop ends without any text.
const FALLBACK_REPLY: &str = "I've completed processing but have no response to give.";

/// Reply suffix when the iteration cap is hit.
const ITERATION_LIMIT_REPLY: &str =
    "I reached the tool iteration limit before finishing. Here's where things stand — ask me to continue if needed.";

/// Emitted when no provider credential exists.
const ONBOARDING_REPLY: &str = "No LLM provider is configured yet. Add an API key to \
     ~/.crewgate/config.json (or set CREWGATE_PROVIDERS__OPENROUTER__API_KEY) and restart the gateway.";

const HELP_REPLY: &str = "Commands:\n\
     /new — clear this room's conversation\n\
     /help — this text\n\
     /stop — cancel running work in this room\n\n\
     Mention @all for every bot, @team for the relevant ones, or @<bot> for one.";

#[derive(Clone, Debug)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    pub history_window: usize,
    /// Any provider credential present; the configuration gate.
    pub configured: bool,
    pub stream_first_iteration: bool,
    /// Record model reasoning content in the audit log.
    pub log_reasoning: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            history_window: 50,
            configured: true,
            stream_first_iteration: false,
            log_reasoning: false,
        }
    }
}

/// Shared collaborators, wired once by the gateway.
pub struct AgentLoopDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub router: Arc<Router>,
    pub rooms: Arc<RoomManager>,
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryFacade>,
    pub secrets: Arc<SecretManager>,
    pub audit: Arc<AuditLog>,
    pub compactor: SessionCompactor,
    pub dispatch: BotDispatch,
    pub multi_bot: MultiBotGenerator,
    pub invoker: Arc<BotInvoker>,
    pub context: ContextBuilder,
    /// Per-bot registries (permission-filtered); "leader" must exist.
    pub registries: HashMap<String, Arc<ToolRegistry>>,
    pub message_tool: Arc<MessageTool>,
    pub invoke_tool: Arc<InvokeTool>,
    pub room_task_tool: Arc<RoomTaskTool>,
    pub request_config: LlmRequestConfig,
}

pub struct AgentLoop {
    deps: AgentLoopDeps,
    config: AgentLoopConfig,
}

#[async_trait]
impl RoomProcessor for AgentLoop {
    async fn process(&self, env: MessageEnvelope) -> Result<Option<MessageEnvelope>> {
        self.process_inbound(env).await
    }
}

impl AgentLoop {
    pub fn new(deps: AgentLoopDeps, config: AgentLoopConfig) -> Self {
        Self { deps, config }
    }

    /// Process one inbound envelope into (maybe) one outbound reply.
    pub async fn process_inbound(&self, env: MessageEnvelope) -> Result<Option<MessageEnvelope>> {
        debug!(room_id = %env.room_id, channel = %env.channel, "processing inbound");

        // 1. Announcements from background work reuse the origin encoded in
        //    chat_id and skip gates and routing overrides.
        if env.is_system() {
            return self.process_system_message(env).await;
        }

        // 2. Configuration gate.
        if !self.config.configured {
            return Ok(Some(reply_to(&env, ONBOARDING_REPLY.to_string())));
        }

        // 3. Slash commands, handled before any LLM call.
        let trimmed = env.content.trim();
        if let Some(reply) = self.handle_slash_command(trimmed, &env).await {
            return Ok(Some(reply));
        }

        // Empty content never reaches a tool or the provider.
        if trimmed.is_empty() {
            return Ok(Some(reply_to(&env, FALLBACK_REPLY.to_string())));
        }

        // 4. First-contact onboarding (explicit /start only).
        if trimmed == "/start" {
            return Ok(Some(self.chat_onboarding(&env)));
        }

        // 5. Orchestrator: room creation and multi-bot fan-out can fully
        //    handle the message.
        let room = self.deps.rooms.get_room(&env.room_id);
        if let Some(reply) = self.try_create_room(trimmed, &env) {
            return Ok(Some(reply));
        }
        let decision = self.deps.dispatch.dispatch(trimmed, room.as_ref(), false, None);
        match decision.target {
            DispatchTarget::MultiBot | DispatchTarget::CrewContext => {
                let mut responding = vec![decision.primary_bot.clone()];
                responding.extend(decision.secondary_bots.iter().cloned());
                return self
                    .process_multi_bot(&env, room.as_ref(), responding, decision.target)
                    .await
                    .map(Some);
            }
            _ => {}
        }
        let acting_bot = decision.primary_bot.clone();

        self.run_agent_turn(&env, room.as_ref(), &acting_bot, false).await
    }

    // ────────────── The iterative turn ──────────────

    /// Gates passed; run the full secret-convert → route → iterate → reply
    /// pipeline for one bot.
    async fn run_agent_turn(
        &self,
        env: &MessageEnvelope,
        room: Option<&Room>,
        bot: &str,
        is_system: bool,
    ) -> Result<Option<MessageEnvelope>> {
        let session_key = env.room_id.clone();
        let (origin_channel, origin_chat_id) = if is_system {
            match env.origin() {
                Some((c, i)) => (c.to_string(), i.to_string()),
                None => anyhow::bail!("system envelope without origin: {}", env.chat_id),
            }
        } else {
            (env.channel.clone(), env.chat_id.clone())
        };

        // Point the stateful tools at this conversation; clears the
        // sent-in-turn flag.
        self.deps
            .message_tool
            .set_context(&origin_channel, &origin_chat_id, &session_key)
            .await;
        self.deps
            .invoke_tool
            .set_context(&origin_channel, &origin_chat_id, &session_key)
            .await;
        self.deps.room_task_tool.set_room(&session_key).await;

        // 6. Secret conversion, then a defense-in-depth sanitizer pass.
        let sanitizer = Sanitizer::new();
        let (symbolic, converted) = self.deps.secrets.to_symbolic(&env.content, &session_key);
        let llm_content = sanitizer.sanitize(&symbolic);

        // 7. Inbound memory event (sanitized).
        self.deps.memory.append_event(
            crewgate_core::bus::Direction::Inbound,
            &env.channel,
            &llm_content,
            &session_key,
            &env.room_id,
        );

        // 8. Feedback detection against the previous assistant reply.
        self.detect_feedback(&session_key, &llm_content);

        // 9. Memory context for this room and query.
        let memory_context = self
            .deps
            .memory
            .assemble_context(&env.room_id, Some(&llm_content), true);

        // 10. Compaction when the session is over threshold.
        let mut compaction_notice: Option<String> = None;
        let session = self.deps.sessions.get_or_create(&session_key);
        if self.deps.compactor.should_compact(&session.messages) {
            match self.deps.compactor.compact(&session.messages).await {
                Ok((compacted, result)) if result.changed() => {
                    self.deps.sessions.replace_messages(&session_key, compacted);
                    compaction_notice = Some(format!(
                        "{} → {} messages, {} → {} tokens",
                        result.original_count,
                        result.compacted_count,
                        result.tokens_before,
                        result.tokens_after
                    ));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "compaction failed, keeping session as-is"),
            }
        }

        // 11. Model selection. Classification failures fall back inside the
        //     router; it never errors.
        let session = self.deps.sessions.get_or_create(&session_key);
        let decision = self.deps.router.select(&llm_content, &session).await;
        self.deps
            .sessions
            .set_metadata(&session_key, META_TIER, decision.tier.as_str());
        self.deps.sessions.set_metadata(
            &session_key,
            META_CONFIDENCE,
            &format!("{:.2}", decision.confidence),
        );
        if converted > 0 {
            debug!(count = converted, "user secrets captured into the vault");
        }

        // 12. The bounded LLM ↔ tool loop.
        let registry = self.registry_for(bot);
        let history = self.deps.sessions.get_history(&session_key, self.config.history_window);
        let system_prompt = self.deps.context.build_system_prompt(
            bot,
            room,
            &origin_channel,
            &origin_chat_id,
            memory_context.as_deref(),
            &self.deps.secrets.vault().list_references(),
        );
        let mut messages = self
            .deps
            .context
            .build_messages(system_prompt, &history, &llm_content);

        let (final_text, hit_cap) = self
            .iterate(&mut messages, &registry, bot, &decision, &env.room_id)
            .await;

        // 13. Finalization.
        let final_text = final_text.map(|t| strip_thinking(&t)).filter(|t| !t.is_empty());
        let content = match (final_text, hit_cap) {
            (Some(text), false) => text,
            (Some(text), true) => format!("{text}\n\n{ITERATION_LIMIT_REPLY}"),
            (None, true) => ITERATION_LIMIT_REPLY.to_string(),
            (None, false) => FALLBACK_REPLY.to_string(),
        };

        let safe_reply = sanitizer.sanitize(&content);
        self.deps
            .sessions
            .add_message(&session_key, ChatMessage::user(llm_content.clone()));
        self.deps
            .sessions
            .add_message(&session_key, ChatMessage::assistant(safe_reply.clone()));
        self.deps.memory.append_event(
            crewgate_core::bus::Direction::Outbound,
            &origin_channel,
            &safe_reply,
            &session_key,
            &env.room_id,
        );

        // A tool already delivered a message this turn: suppress the
        // duplicate auto-reply.
        if self.deps.message_tool.sent_in_turn() {
            info!(room_id = %env.room_id, "message tool already replied; suppressing auto-reply");
            return Ok(None);
        }

        let session = self.deps.sessions.get_or_create(&session_key);
        let mut reply =
            MessageEnvelope::outbound(&origin_channel, &origin_chat_id, &env.room_id, safe_reply)
                .with_metadata("context_usage", session.token_estimate.to_string())
                .with_metadata("routing_tier", decision.tier.as_str());
        if let Some(notice) = compaction_notice {
            reply = reply.with_metadata("compaction_notice", notice);
        }
        Ok(Some(reply))
    }

    /// The provider ↔ tool iteration. Returns the final text (if any) and
    /// whether the iteration cap was hit.
    async fn iterate(
        &self,
        messages: &mut Vec<ChatMessage>,
        registry: &Arc<ToolRegistry>,
        bot: &str,
        decision: &RouteDecision,
        room_id: &str,
    ) -> (Option<String>, bool) {
        let tool_defs = registry.definitions();
        let identity = self.deps.context.identities().load(bot);
        let mut model = decision.model.clone();
        let mut used_secondary = false;
        let mut reflected = false;

        for iteration in 0..self.config.max_iterations {
            let stream = self.config.stream_first_iteration && iteration == 0;
            let response = self.call_model(messages, &tool_defs, &model, stream).await;

            // One retry on the tier's secondary model after a transport
            // failure.
            if response.transport_error && !used_secondary {
                if let Some(secondary) = self.deps.router.secondary_for(decision.tier) {
                    warn!(model = %model, secondary = %secondary, "primary failed, retrying on secondary");
                    used_secondary = true;
                    model = secondary;
                    continue;
                }
            }
            if response.transport_error {
                return (response.content, false);
            }

            if self.config.log_reasoning {
                if let Some(reasoning) = &response.reasoning_content {
                    self.deps.audit.log(crewgate_security::AuditEntry {
                        timestamp: crewgate_core::utils::timestamp_utc(),
                        operation: "model.reasoning".into(),
                        key_ref: String::new(),
                        success: true,
                        duration_ms: 0,
                        room_id: Some(room_id.to_string()),
                        error: None,
                        details: Some(serde_json::json!({
                            "tier": decision.tier.as_str(),
                            "reasoning": reasoning.chars().take(500).collect::<String>(),
                        })),
                    });
                }
            }

            if !response.has_tool_calls() {
                return (response.content, false);
            }

            let tool_calls = response.tool_calls.clone();
            ContextBuilder::add_assistant_message(messages, response.content.clone(), tool_calls.clone());

            for call in &tool_calls {
                let result = self
                    .execute_tool_call(call, registry, &identity.role_card, room_id)
                    .await;
                // Sanitized before rejoining the provider-bound list.
                let safe = Sanitizer::new().sanitize(&result);
                ContextBuilder::add_tool_result(messages, &call.id, &safe);
            }

            // Reflect-then-continue for the heavier tiers, once per turn.
            if !reflected && matches!(decision.tier, Tier::Reasoning | Tier::Complex) {
                messages.push(ChatMessage::user(
                    "Before answering, double-check the tool results against the original question.",
                ));
                reflected = true;
            }
        }

        (None, true)
    }

    /// Hard-ban check, symbolic→concrete argument resolution, execution,
    /// and the audit entry, for one tool call.
    async fn execute_tool_call(
        &self,
        call: &ToolCall,
        registry: &Arc<ToolRegistry>,
        role_card: &crate::identity::RoleCard,
        room_id: &str,
    ) -> String {
        let name = call.function.name.as_str();
        let action = format!("{name} {}", call.function.arguments);
        if let Some(ban) = role_card.violates_hard_ban(&action) {
            self.deps
                .audit
                .log_tool(name, "", false, 0, Some(room_id), Some("hard ban"));
            return format!("Refused: this action violates a hard ban ({ban}).");
        }

        // Symbolic references in arguments become concrete only here, for
        // the duration of this call.
        let concrete_args = self.deps.secrets.from_symbolic(&call.function.arguments);
        let params: HashMap<String, serde_json::Value> =
            serde_json::from_str(&concrete_args).unwrap_or_default();

        let key_ref = if name == "web_search" {
            crewgate_security::KeyVault::to_ref("brave_key")
        } else {
            String::new()
        };

        info!(tool = %name, room_id = %room_id, "executing tool call");
        let start = Instant::now();
        let result = registry.execute(name, params).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let failed = result.starts_with("Error");
        self.deps.audit.observe_response_size(&key_ref, result.len());
        self.deps.audit.log_tool(
            name,
            &key_ref,
            !failed,
            duration_ms,
            Some(room_id),
            failed.then(|| result.as_str()).as_deref(),
        );
        result
    }

    /// One provider call, streaming or not. Streaming accumulates deltas;
    /// only the terminal chunk carries tool calls.
    async fn call_model(
        &self,
        messages: &[ChatMessage],
        tool_defs: &[crewgate_core::types::ToolDefinition],
        model: &str,
        stream: bool,
    ) -> LlmResponse {
        if !stream {
            return self
                .deps
                .provider
                .chat(messages, Some(tool_defs), model, &self.deps.request_config)
                .await;
        }

        let mut rx = self
            .deps
            .provider
            .stream_chat(messages, Some(tool_defs), model, &self.deps.request_config)
            .await;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        while let Some(chunk) = rx.recv().await {
            content.push_str(&chunk.delta);
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
                tool_calls = chunk.tool_calls;
            }
        }
        let transport_error = finish_reason.as_deref() == Some("error");
        LlmResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
            finish_reason,
            usage: None,
            reasoning_content: None,
            transport_error,
        }
    }

    // ────────────── Orchestrator paths ──────────────

    /// Multi-bot fan-out: N bots answer one message in parallel; the
    /// combined block is one (user, assistant) pair in the session.
    async fn process_multi_bot(
        &self,
        env: &MessageEnvelope,
        room: Option<&Room>,
        bots: Vec<String>,
        mode: DispatchTarget,
    ) -> Result<MessageEnvelope> {
        let session_key = env.room_id.clone();
        let sanitizer = Sanitizer::new();
        let (symbolic, _) = self.deps.secrets.to_symbolic(&env.content, &session_key);
        let llm_content = sanitizer.sanitize(&symbolic);

        self.deps.memory.append_event(
            crewgate_core::bus::Direction::Inbound,
            &env.channel,
            &llm_content,
            &session_key,
            &env.room_id,
        );

        let memory_context = self
            .deps
            .memory
            .assemble_context(&env.room_id, Some(&llm_content), true);
        let history_brief = brief_history(&self.deps.sessions.get_history(&session_key, 6));

        let responses = self
            .deps
            .multi_bot
            .generate(
                &llm_content,
                &bots,
                mode,
                room,
                memory_context.as_deref(),
                &history_brief,
            )
            .await;
        let combined = self.deps.multi_bot.format_combined(&responses);
        let safe_combined = sanitizer.sanitize(&combined);

        self.deps
            .sessions
            .add_message(&session_key, ChatMessage::user(llm_content.clone()));
        self.deps
            .sessions
            .add_message(&session_key, ChatMessage::assistant(safe_combined.clone()));
        self.deps.memory.append_event(
            crewgate_core::bus::Direction::Outbound,
            &env.channel,
            &safe_combined,
            &session_key,
            &env.room_id,
        );

        let mode_label = match mode {
            DispatchTarget::MultiBot => "multi_bot",
            DispatchTarget::CrewContext => "crew_context",
            _ => "multi_bot",
        };
        Ok(
            MessageEnvelope::outbound(&env.channel, &env.chat_id, &env.room_id, safe_combined)
                .with_metadata("multi_bot", "true")
                .with_metadata("mode", mode_label)
                .with_metadata("responding_bots", bots.join(",")),
        )
    }

    /// Announcement from a delegated task: rejoin the origin conversation
    /// and run the same loop so the leader can summarize.
    async fn process_system_message(&self, env: MessageEnvelope) -> Result<Option<MessageEnvelope>> {
        info!(sender = %env.sender_id, chat_id = %env.chat_id, "processing system announcement");
        if env.origin().is_none() {
            anyhow::bail!("invalid system chat_id format: {}", env.chat_id);
        }
        let room = self.deps.rooms.get_room(&env.room_id);
        self.run_agent_turn(&env, room.as_ref(), "leader", true).await
    }

    fn try_create_room(&self, content: &str, env: &MessageEnvelope) -> Option<MessageEnvelope> {
        let intent = detect_room_creation(content)?;
        let bots = suggest_bots_for_project(&intent.project_type);
        match self.deps.rooms.create_project_room(&intent.room_name, bots.clone()) {
            Ok(new_room) => {
                info!(room_id = %new_room.id, "room created from chat intent");
                Some(reply_to(
                    env,
                    format!(
                        "Created room `{}` for the {} project with {}. \
                         Join a channel to it to chat there.",
                        new_room.id,
                        intent.project_type,
                        bots.join(", ")
                    ),
                ))
            }
            Err(e) => Some(reply_to(env, format!("Couldn't create that room: {e}"))),
        }
    }

    // ────────────── Small handlers ──────────────

    async fn handle_slash_command(
        &self,
        content: &str,
        env: &MessageEnvelope,
    ) -> Option<MessageEnvelope> {
        match content {
            "/new" => {
                self.deps.sessions.clear(&env.room_id);
                Some(reply_to(env, "Started a fresh session. Room state and tasks are untouched.".into()))
            }
            "/help" => Some(reply_to(env, HELP_REPLY.to_string())),
            "/stop" => {
                let invocations = self.deps.invoker.cancel_room(&env.room_id).await;
                let blocked = self.deps.rooms.block_room_tasks(&env.room_id);
                Some(reply_to(
                    env,
                    format!(
                        "Stopped. Cancelled {invocations} delegated invocation(s) and 0 \
                         parallel sub-bot task(s); marked {blocked} in-progress task(s) as blocked."
                    ),
                ))
            }
            _ => None,
        }
    }

    fn chat_onboarding(&self, env: &MessageEnvelope) -> MessageEnvelope {
        self.deps
            .sessions
            .set_metadata(&env.room_id, "onboarded", "true");
        let participants = self.deps.rooms.participants(&env.room_id);
        reply_to(
            env,
            format!(
                "Welcome! This room has: {}. Talk normally and the leader coordinates; \
                 mention @all or @team to hear from several bots at once. /help lists commands.",
                participants.join(", ")
            ),
        )
    }

    /// Light correction detection: a user message that pushes back on the
    /// previous assistant reply becomes a learning.
    fn detect_feedback(&self, session_key: &str, content: &str) {
        let lower = content.to_lowercase();
        const MARKERS: &[&str] = &["that's wrong", "not what i asked", "no, i meant", "actually,", "incorrect"];
        if !MARKERS.iter().any(|m| lower.starts_with(m) || lower.contains(m)) {
            return;
        }
        let history = self.deps.sessions.get_history(session_key, 2);
        let Some(last_assistant) = history.iter().rev().find(|m| m.role() == "assistant") else {
            return;
        };
        let learning = format!(
            "Correction received: \"{}\" (after assistant said: \"{}\")",
            crewgate_core::utils::truncate_string(content, 120),
            crewgate_core::utils::truncate_string(last_assistant.text(), 120),
        );
        self.deps.memory.record_learning(&learning, "feedback", 0.7);
    }

    fn registry_for(&self, bot: &str) -> Arc<ToolRegistry> {
        self.deps
            .registries
            .get(bot)
            .or_else(|| self.deps.registries.get("leader"))
            .cloned()
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()))
    }

    /// Estimated tokens currently in a room's session.
    pub fn session_tokens(&self, room_id: &str) -> usize {
        count_messages(&self.deps.sessions.get_or_create(room_id).messages)
    }
}

fn reply_to(env: &MessageEnvelope, content: String) -> MessageEnvelope {
    MessageEnvelope::outbound(&env.channel, &env.chat_id, &env.room_id, content)
}

/// Compress recent history into a few "role: text" lines for communal
/// prompts.
fn brief_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .filter(|m| matches!(m.role(), "user" | "assistant"))
        .map(|m| {
            format!(
                "{}: {}",
                m.role(),
                crewgate_core::utils::truncate_string(m.text(), 120)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
