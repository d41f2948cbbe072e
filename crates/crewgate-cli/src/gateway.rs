//! Gateway wiring — builds every component from configuration and runs the
//! long-lived process.
//!
//! Shutdown order on ctrl-c: stop intake and drain room brokers, flush the
//! remaining outbound envelopes, stop the routine scheduler, disconnect MCP
//! servers, then drop everything (provider keys wipe on drop).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crewgate_agent::context::ContextBuilder;
use crewgate_agent::identity::IdentityStore;
use crewgate_agent::teams::{generate_personality_files, get_team};
use crewgate_agent::tools::filesystem::{EditFileTool, ListDirTool, PathPolicy, ReadFileTool, WriteFileTool};
use crewgate_agent::tools::invoke::InvokeTool;
use crewgate_agent::tools::mcp::{McpClient, McpConnectTool};
use crewgate_agent::tools::message::MessageTool;
use crewgate_agent::tools::permissions::permissions_for_bot;
use crewgate_agent::tools::room_task::RoomTaskTool;
use crewgate_agent::tools::routine::RoutineTool;
use crewgate_agent::tools::shell::ExecTool;
use crewgate_agent::tools::web::{WebFetchTool, WebSearchTool};
use crewgate_agent::tools::{Tool, ToolRegistry};
use crewgate_agent::{AgentLoop, BotDispatch, BotInvoker, MemoryFacade, MultiBotGenerator};
use crewgate_agent::agent_loop::{AgentLoopConfig, AgentLoopDeps};
use crewgate_core::bus::{Bus, ChannelAdapter, MessageEnvelope, RoomBrokerManager};
use crewgate_core::config::{load_config, resolve_keyring_markers, Config};
use crewgate_core::rooms::RoomManager;
use crewgate_core::session::compactor::{CompactionConfig, CompactionMode, FlushHook, Summarizer};
use crewgate_core::session::{SessionCompactor, SessionStore};
use crewgate_core::types::{ChatMessage, LlmResponse, ToolDefinition};
use crewgate_core::utils::{expand_home, get_data_path};
use crewgate_providers::http_provider::create_provider;
use crewgate_providers::{LlmProvider, LlmRequestConfig, Router};
use crewgate_routines::{RoutineRunner, RoutineService};
use crewgate_security::{
    AnomalyDetector, AuditLog, InMemoryKeyring, KeyVault, KeyringStore, OsKeyring, SecretManager,
};

/// Everything a running gateway (or the chat REPL) needs.
pub struct Runtime {
    pub bus: Arc<Bus>,
    pub brokers: Arc<RoomBrokerManager>,
    pub rooms: Arc<RoomManager>,
    pub sessions: Arc<SessionStore>,
    pub routines: Arc<RoutineService>,
    pub mcp: Arc<McpConnectTool>,
    pub audit: Arc<AuditLog>,
    pub configured: bool,
    pub routines_enabled: bool,
}

/// Placeholder backend used before any provider credential exists; the
/// agent loop's configuration gate replies before this is ever called.
struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
        _model: &str,
        _config: &LlmRequestConfig,
    ) -> LlmResponse {
        LlmResponse::error("No LLM provider configured")
    }
    fn default_model(&self) -> &str {
        "unconfigured"
    }
    fn display_name(&self) -> &str {
        "Unconfigured"
    }
}

/// The in-tree channel adapter: prints replies to the terminal. Real
/// bridges (Telegram, Discord, …) implement the same contract out of tree.
struct CliChannel;

#[async_trait]
impl ChannelAdapter for CliChannel {
    fn channel(&self) -> &str {
        "cli"
    }

    async fn deliver(&self, env: &MessageEnvelope) -> Result<()> {
        println!("\n{}\n", env.content);
        Ok(())
    }
}

/// MCP client stub for installs without an external MCP bridge.
struct UnconfiguredMcpClient;

#[async_trait]
impl McpClient for UnconfiguredMcpClient {
    async fn connect(&self, server: &str) -> Result<Vec<Arc<dyn Tool>>> {
        anyhow::bail!("no MCP bridge configured; cannot connect to '{server}'")
    }
    async fn disconnect(&self, _server: &str) -> Result<()> {
        Ok(())
    }
}

pub fn build_runtime(mut config: Config) -> Result<Runtime> {
    let data_dir = get_data_path();
    let workspace = expand_home(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    // ── Secret pipeline ──
    let keyring: Arc<dyn KeyringStore> = {
        let os = OsKeyring::new(&config.security.keyring_service);
        if os.is_available() {
            Arc::new(os)
        } else {
            warn!("OS keyring unavailable; secrets will not survive restarts");
            Arc::new(InMemoryKeyring::new())
        }
    };
    let vault = Arc::new(KeyVault::new(keyring.clone()));
    let resolved = resolve_keyring_markers(&mut config, |name| keyring.get_key(name));
    if resolved > 0 {
        info!(count = resolved, "loaded provider keys from the OS keyring");
    }
    let secrets = Arc::new(SecretManager::new(vault.clone()));

    let audit_path = if config.security.audit_log_path.is_empty() {
        data_dir.join("audit.log")
    } else {
        expand_home(&config.security.audit_log_path)
    };
    let audit = Arc::new(
        AuditLog::new(audit_path).with_anomaly_detector(Arc::new(AnomalyDetector::new())),
    );

    // ── Identity & team styling ──
    let identities = IdentityStore::new(&workspace);
    if !identities.has_soul("leader") {
        if let Some(team) = get_team(&config.team.name) {
            generate_personality_files(&workspace, team, &config.team.bots);
        }
    }
    let mut known_bots = vec!["leader".to_string()];
    known_bots.extend(config.team.bots.iter().cloned());

    // ── Provider & router ──
    let configured = config.providers.any_configured();
    let providers_map = config.providers.to_map();
    let defaults = &config.agents.defaults;
    let provider: Arc<dyn LlmProvider> = if configured {
        Arc::new(create_provider(&defaults.model, &providers_map)?)
    } else {
        Arc::new(UnconfiguredProvider)
    };

    let mut router = Router::new(config.routing.clone(), defaults.model.clone());
    if configured && !config.routing.classifier_model.is_empty() {
        match create_provider(&config.routing.classifier_model, &providers_map) {
            Ok(classifier) => router = router.with_classifier(Arc::new(classifier)),
            Err(e) => warn!(error = %e, "classifier model unavailable, layer disabled"),
        }
    }
    let router = Arc::new(router);
    let request_config = LlmRequestConfig {
        max_tokens: defaults.max_tokens,
        temperature: defaults.temperature,
    };

    // ── State ──
    let rooms = Arc::new(RoomManager::new(data_dir.clone())?);
    let sessions = Arc::new(SessionStore::new(data_dir.join("sessions"))?);
    let memory = Arc::new(MemoryFacade::new(&workspace));

    // ── Compactor: LLM summarizer when configured, flush hook always ──
    let compaction_config = CompactionConfig {
        mode: CompactionMode::parse(&config.session.compaction_mode),
        threshold_percent: config.session.threshold_percent,
        max_context_tokens: config.session.max_context_tokens,
        preserve_recent: config.session.preserve_recent,
        summary_chunk_size: config.session.summary_chunk_size,
        ..Default::default()
    };
    let mut compactor = SessionCompactor::new(compaction_config);
    if configured {
        let summarizer_provider = provider.clone();
        let summarizer_model = defaults.model.clone();
        let summarizer: Summarizer = Arc::new(move |chunk| {
            let provider = summarizer_provider.clone();
            let model = summarizer_model.clone();
            Box::pin(async move {
                let rendered = render_for_summary(&chunk);
                let prompt = format!(
                    "Summarize this conversation segment in 2-3 sentences. Focus on key \
                     topics, decisions, and any errors.\n\n{rendered}\n\nSummary:"
                );
                let request = LlmRequestConfig {
                    max_tokens: 150,
                    temperature: 0.3,
                };
                let response = provider
                    .chat(&[ChatMessage::user(prompt)], None, &model, &request)
                    .await;
                if response.transport_error {
                    anyhow::bail!("summarizer call failed");
                }
                Ok(response.content.unwrap_or_default())
            })
        });
        compactor = compactor.with_summarizer(summarizer);
    }
    {
        let memory = memory.clone();
        let hook: FlushHook = Arc::new(move || {
            let memory = memory.clone();
            Box::pin(async move { memory.flush().await })
        });
        compactor = compactor.with_flush_hook(hook);
    }

    // ── Bus, invoker, tools ──
    let bus = Arc::new(Bus::new(100));

    let mut protected: Vec<std::path::PathBuf> = config
        .tools
        .protected_paths
        .iter()
        .map(|p| expand_home(p))
        .collect();
    protected.push(crewgate_core::config::get_config_path());
    let path_policy = Arc::new(
        PathPolicy {
            workspace: workspace.clone(),
            restrict_to_workspace: config.tools.restrict_to_workspace,
            allowed_paths: config.tools.allowed_paths.iter().map(|p| expand_home(p)).collect(),
            protected_paths: Vec::new(),
        }
        .with_protected(protected),
    );

    let brave_key_ref = (!config.tools.brave_api_key.is_empty()).then(|| config.tools.brave_api_key.clone());
    let specialists: Vec<String> = known_bots.iter().filter(|b| *b != "leader").cloned().collect();
    let invoker = Arc::new(BotInvoker::new(
        provider.clone(),
        IdentityStore::new(&workspace),
        path_policy.clone(),
        bus.clone(),
        vault.clone(),
        audit.clone(),
        defaults.model.clone(),
        request_config.clone(),
        specialists,
        brave_key_ref.clone(),
        config.tools.exec_timeout_s,
    ));

    // ── Routine service, fed by the same delegated-run machinery ──
    let runner: RoutineRunner = {
        let invoker = invoker.clone();
        Arc::new(move |bot, check| {
            let invoker = invoker.clone();
            Box::pin(async move { invoker.run_check(&bot, &check).await })
        })
    };
    let routines = Arc::new(RoutineService::new(data_dir.clone(), runner)?);

    // ── Shared tool instances & per-bot registries ──
    let message_tool = Arc::new(MessageTool::new(Some(bus.clone())));
    let invoke_tool = Arc::new(InvokeTool::new(invoker.clone()));
    let room_task_tool = Arc::new(RoomTaskTool::new(rooms.clone()));
    let routine_tool = Arc::new(RoutineTool::new(
        routines.clone(),
        config.routines.default_interval_s,
        config.routines.retain_history_count,
    ));

    let mut registries: HashMap<String, Arc<ToolRegistry>> = HashMap::new();
    let mut mcp: Option<Arc<McpConnectTool>> = None;
    for bot in &known_bots {
        let identity = identities.load(bot);
        let perms = permissions_for_bot(identity.soul.as_deref(), identity.agents_md.as_deref());
        let registry = Arc::new(ToolRegistry::with_permissions(perms));
        let caps = &identity.role_card.capabilities;

        registry.register(Arc::new(ReadFileTool::new(path_policy.clone())));
        registry.register(Arc::new(WriteFileTool::new(path_policy.clone())));
        registry.register(Arc::new(EditFileTool::new(path_policy.clone())));
        registry.register(Arc::new(ListDirTool::new(path_policy.clone())));
        if caps.can_exec_commands {
            registry.register(Arc::new(ExecTool::new(
                path_policy.clone(),
                Some(config.tools.exec_timeout_s),
            )));
        }
        if caps.can_access_web {
            registry.register(Arc::new(WebSearchTool::new(brave_key_ref.clone(), vault.clone())));
            registry.register(Arc::new(WebFetchTool::new()));
        }
        if caps.can_send_messages {
            registry.register(message_tool.clone());
        }
        registry.register(room_task_tool.clone());
        if bot == "leader" || caps.can_invoke_bots {
            registry.register(invoke_tool.clone());
        }
        if bot == "leader" {
            registry.register(routine_tool.clone());
            let mcp_tool = Arc::new(McpConnectTool::new(
                Arc::new(UnconfiguredMcpClient),
                registry.clone(),
            ));
            registry.register(mcp_tool.clone());
            mcp = Some(mcp_tool);
        }

        info!(bot = %bot, tools = registry.len(), "bot registry built");
        registries.insert(bot.clone(), registry);
    }
    let mcp = mcp.expect("leader registry always exists");

    // ── Dispatch, multi-bot, and the loop itself ──
    let dispatch = BotDispatch::new(known_bots.clone());
    let multi_bot = MultiBotGenerator::new(
        provider.clone(),
        IdentityStore::new(&workspace),
        defaults.model.clone(),
        defaults.temperature,
        config.team.name.clone(),
    );

    let deps = AgentLoopDeps {
        provider,
        router,
        rooms: rooms.clone(),
        sessions: sessions.clone(),
        memory,
        secrets,
        audit: audit.clone(),
        compactor,
        dispatch,
        multi_bot,
        invoker,
        context: ContextBuilder::new(identities, "Crewgate"),
        registries,
        message_tool,
        invoke_tool,
        room_task_tool,
        request_config,
    };
    let loop_config = AgentLoopConfig {
        max_iterations: defaults.max_tool_iterations as usize,
        history_window: config.session.history_window,
        configured,
        stream_first_iteration: defaults.stream,
        log_reasoning: config.security.log_reasoning,
    };
    let agent_loop = Arc::new(AgentLoop::new(deps, loop_config));
    let brokers = Arc::new(RoomBrokerManager::new(agent_loop, rooms.clone(), bus.clone()));

    Ok(Runtime {
        bus,
        brokers,
        rooms,
        sessions,
        routines,
        mcp,
        audit,
        configured,
        routines_enabled: config.routines.enabled,
    })
}

/// Run the gateway until ctrl-c.
pub async fn run() -> Result<()> {
    let config = load_config(None);
    let runtime = Arc::new(build_runtime(config)?);

    info!(
        configured = runtime.configured,
        rooms = runtime.rooms.list_rooms().len(),
        sessions = runtime.sessions.list_keys().len(),
        "crewgate gateway starting"
    );
    if !runtime.configured {
        eprintln!("⚠ No provider credential found — the gateway will only answer with onboarding help.");
    }

    // Intake: bus → per-room brokers.
    let brokers = runtime.brokers.clone();
    let intake = tokio::spawn(async move { brokers.run().await });

    // Routine scheduler.
    let routine_handle = if runtime.routines_enabled {
        let routines = runtime.routines.clone();
        Some(tokio::spawn(async move { routines.run().await }))
    } else {
        None
    };

    // Outbound pump: deliver through the attached channel adapters; log
    // envelopes for channels without one.
    let bus = runtime.bus.clone();
    let pump = tokio::spawn(async move {
        let adapters: Vec<Box<dyn ChannelAdapter>> = vec![Box::new(CliChannel)];
        while let Some(env) = bus.consume_outbound().await {
            match adapters.iter().find(|a| a.channel() == env.channel) {
                Some(adapter) => {
                    if let Err(e) = adapter.deliver(&env).await {
                        warn!(channel = %env.channel, error = %e, "delivery failed");
                    }
                }
                None => {
                    info!(channel = %env.channel, chat_id = %env.chat_id, "outbound (no adapter attached)");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Ordered shutdown.
    runtime.brokers.shutdown().await;
    while let Some(env) = runtime.bus.try_consume_outbound() {
        info!(channel = %env.channel, "drained outbound during shutdown");
        if env.channel == "cli" {
            println!("\n{}\n", env.content);
        }
    }
    if let Some(handle) = routine_handle {
        runtime.routines.stop();
        let _ = handle.await;
    }
    runtime.mcp.disconnect_all().await;
    intake.abort();
    pump.abort();
    info!("crewgate gateway stopped");
    Ok(())
}

fn render_for_summary(chunk: &[ChatMessage]) -> String {
    chunk
        .iter()
        .map(|m| format!("{}: {}", m.role(), crewgate_core::utils::truncate_string(m.text(), 300)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_runtime_from_defaults() {
        // Point HOME somewhere disposable so ~/.crewgate lands in a sandbox.
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());

        let mut config = Config::default();
        config.agents.defaults.workspace = dir.path().join("ws").display().to_string();

        let runtime = build_runtime(config).unwrap();
        assert!(!runtime.configured);
        // The general room exists from first start.
        assert!(runtime.rooms.get_room("general").is_some());
        // Team personality files were generated for the leader.
        assert!(dir.path().join("ws/bots/leader/SOUL.md").exists());
    }

    #[test]
    fn test_render_for_summary() {
        let chunk = vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")];
        let rendered = render_for_summary(&chunk);
        assert!(rendered.contains("user: hello"));
        assert!(rendered.contains("assistant: hi"));
    }
}
