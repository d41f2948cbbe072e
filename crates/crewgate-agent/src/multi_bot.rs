//! Multi-bot response generation.
//!
//! One user message fans out to N bots in parallel. Each bot gets a
//! communal system prompt (its persona, the other participants, room info,
//! a short history brief, memory context, and mode rules), replies in 2–3
//! sentences, and the batch is stitched into one labeled reply with
//! cross-references injected.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tracing::{info, warn};

use crewgate_core::rooms::Room;
use crewgate_core::types::ChatMessage;
use crewgate_providers::{LlmProvider, LlmRequestConfig};

use crate::cross_reference::CrossReferenceInjector;
use crate::dispatch::DispatchTarget;
use crate::identity::{affinity_bucket, IdentityStore};
use crate::teams::{get_team, Team};

/// Cap on each bot's reply.
const MULTI_BOT_MAX_TOKENS: u32 = 1024;

/// Shown in place of a bot whose call failed.
const ERROR_PLACEHOLDER: &str = "❌ I hit an error while answering.";

/// One bot's contribution to a fan-out.
#[derive(Clone, Debug)]
pub struct BotResponse {
    pub bot_name: String,
    pub content: String,
    pub is_error: bool,
    pub response_time_ms: u64,
}

pub struct MultiBotGenerator {
    provider: Arc<dyn LlmProvider>,
    identities: IdentityStore,
    model: String,
    temperature: f64,
    theme: String,
    injector: CrossReferenceInjector,
}

impl MultiBotGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        identities: IdentityStore,
        model: impl Into<String>,
        temperature: f64,
        theme: impl Into<String>,
    ) -> Self {
        let theme = theme.into();
        Self {
            provider,
            identities,
            model: model.into(),
            temperature,
            injector: CrossReferenceInjector::new(theme.clone()),
            theme,
        }
    }

    fn team(&self) -> Option<&'static Team> {
        get_team(&self.theme)
    }

    /// Run all bots in parallel for one user message.
    pub async fn generate(
        &self,
        user_message: &str,
        bots: &[String],
        mode: DispatchTarget,
        room: Option<&Room>,
        memory_context: Option<&str>,
        history_brief: &str,
    ) -> Vec<BotResponse> {
        info!(bots = bots.len(), mode = ?mode, "generating multi-bot responses");

        let calls = bots.iter().map(|bot| {
            let others: Vec<String> = bots.iter().filter(|b| *b != bot).cloned().collect();
            self.generate_single(bot, user_message, others, mode, room, memory_context, history_brief)
        });

        let mut responses: Vec<BotResponse> = join_all(calls).await;
        self.injector.inject(&mut responses);
        responses
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_single(
        &self,
        bot: &str,
        user_message: &str,
        others: Vec<String>,
        mode: DispatchTarget,
        room: Option<&Room>,
        memory_context: Option<&str>,
        history_brief: &str,
    ) -> BotResponse {
        let start = Instant::now();
        let system = self.communal_context(bot, &others, mode, room, memory_context, history_brief);
        let messages = [ChatMessage::system(system), ChatMessage::user(user_message)];

        let request = LlmRequestConfig {
            max_tokens: MULTI_BOT_MAX_TOKENS,
            temperature: self.temperature,
        };
        let response = self.provider.chat(&messages, None, &self.model, &request).await;
        let elapsed = start.elapsed().as_millis() as u64;

        if response.transport_error || response.content.as_deref().unwrap_or("").is_empty() {
            warn!(bot = %bot, "multi-bot call failed, using placeholder");
            return BotResponse {
                bot_name: bot.to_string(),
                content: ERROR_PLACEHOLDER.to_string(),
                is_error: true,
                response_time_ms: elapsed,
            };
        }

        BotResponse {
            bot_name: bot.to_string(),
            content: response.content.unwrap_or_default(),
            is_error: false,
            response_time_ms: elapsed,
        }
    }

    /// The per-bot communal system prompt.
    fn communal_context(
        &self,
        bot: &str,
        others: &[String],
        mode: DispatchTarget,
        room: Option<&Room>,
        memory_context: Option<&str>,
        history_brief: &str,
    ) -> String {
        let identity = self.identities.load(bot);
        let persona = identity
            .soul
            .clone()
            .or(identity.identity_md.clone())
            .unwrap_or_else(|| format!("You are {bot}, a specialist bot."));

        let mut parts = vec![
            format!("# You are @{bot}"),
            String::new(),
            "## Your Identity".into(),
            persona,
            String::new(),
            "## Current Situation".into(),
        ];

        if let Some(room) = room {
            parts.push(format!("Room: {}", room.id));
        }
        parts.push(format!(
            "Other bots present: {}",
            if others.is_empty() { "none".to_string() } else { others.join(", ") }
        ));

        if !history_brief.is_empty() {
            parts.push(String::new());
            parts.push("## Recent Conversation".into());
            parts.push(history_brief.to_string());
        }
        if let Some(memory) = memory_context {
            parts.push(String::new());
            parts.push(memory.to_string());
        }

        parts.push(String::new());
        parts.push("## How to Respond".into());
        match mode {
            DispatchTarget::MultiBot => {
                parts.push("- You are responding as part of a group (@all was mentioned)".into());
                parts.push("- Respond in your own voice and personality".into());
                parts.push("- Be concise but characterful (2-3 sentences max)".into());
                parts.push("- Show your domain expertise".into());
            }
            _ => {
                parts.push("- You were selected as relevant to this message".into());
                parts.push("- Focus on your domain of expertise".into());
                parts.push("- Be concise (2-3 sentences max)".into());
                parts.push("- Give specific, actionable input".into());
            }
        }

        // Relationship tone toward the other participants.
        if mode == DispatchTarget::MultiBot && !others.is_empty() {
            let mut lines = Vec::new();
            for other in others {
                let affinity = identity.affinity_with(other);
                let tone = match affinity_bucket(affinity) {
                    "agree" => "you usually back them up",
                    "challenging" => "you tend to push back on them",
                    _ => "you keep it professional",
                };
                lines.push(format!("- @{other}: {tone}"));
            }
            parts.push(String::new());
            parts.push("## Relationships".into());
            parts.extend(lines);
        }

        parts.join("\n")
    }

    /// Stitch responses into one labeled reply block per bot.
    pub fn format_combined(&self, responses: &[BotResponse]) -> String {
        let team = self.team();
        let mut parts = vec!["🎭 **Team Response**".to_string(), String::new()];
        for response in responses {
            let emoji = team.map(|t| t.emoji_for(&response.bot_name)).unwrap_or("🤖");
            parts.push(format!("{emoji} **@{}:**", response.bot_name));
            parts.push(response.content.clone());
            parts.push(String::new());
        }
        parts.join("\n").trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crewgate_core::types::{LlmResponse, ToolDefinition};
    use tempfile::tempdir;

    /// Replies with a fixed line; errors for bots whose prompt mentions a
    /// poisoned name.
    struct MockProvider {
        fail_for: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            config: &LlmRequestConfig,
        ) -> LlmResponse {
            assert!(config.max_tokens <= 1024);
            let system = messages[0].text().to_string();
            if let Some(fail) = &self.fail_for {
                if system.starts_with(&format!("# You are @{fail}")) {
                    return LlmResponse::error("boom");
                }
            }
            let bot = system
                .lines()
                .next()
                .unwrap_or("")
                .trim_start_matches("# You are @")
                .to_string();
            LlmResponse {
                content: Some(format!("{bot} checking in.")),
                ..Default::default()
            }
        }
        fn default_model(&self) -> &str {
            "mock"
        }
        fn display_name(&self) -> &str {
            "Mock"
        }
    }

    fn generator(dir: &std::path::Path, fail_for: Option<&str>) -> MultiBotGenerator {
        MultiBotGenerator::new(
            Arc::new(MockProvider {
                fail_for: fail_for.map(str::to_string),
            }),
            IdentityStore::new(dir),
            "mock-model",
            0.7,
            "pirate_crew",
        )
    }

    fn bots(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_bots_respond() {
        let dir = tempdir().unwrap();
        let gen = generator(dir.path(), None);
        let responses = gen
            .generate(
                "what do you think?",
                &bots(&["leader", "researcher", "coder"]),
                DispatchTarget::MultiBot,
                None,
                None,
                "",
            )
            .await;

        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| !r.is_error));
        assert!(responses[1].content.contains("researcher checking in."));
    }

    #[tokio::test]
    async fn test_failed_bot_gets_placeholder_only() {
        let dir = tempdir().unwrap();
        let gen = generator(dir.path(), Some("coder"));
        let responses = gen
            .generate(
                "status?",
                &bots(&["leader", "coder"]),
                DispatchTarget::MultiBot,
                None,
                None,
                "",
            )
            .await;

        let coder = responses.iter().find(|r| r.bot_name == "coder").unwrap();
        assert!(coder.is_error);
        assert_eq!(coder.content, ERROR_PLACEHOLDER);
        let leader = responses.iter().find(|r| r.bot_name == "leader").unwrap();
        assert!(!leader.is_error);
    }

    #[tokio::test]
    async fn test_format_combined_labels_every_bot() {
        let dir = tempdir().unwrap();
        let gen = generator(dir.path(), None);
        let responses = vec![
            BotResponse {
                bot_name: "leader".into(),
                content: "On it.".into(),
                is_error: false,
                response_time_ms: 5,
            },
            BotResponse {
                bot_name: "researcher".into(),
                content: "Data incoming.".into(),
                is_error: false,
                response_time_ms: 7,
            },
        ];
        let combined = gen.format_combined(&responses);
        assert!(combined.contains("**@leader:**"));
        assert!(combined.contains("**@researcher:**"));
        assert!(combined.contains("🏴‍☠️")); // pirate leader emoji
        assert!(combined.contains("On it."));
    }

    #[test]
    fn test_communal_context_mentions_others_and_mode() {
        let dir = tempdir().unwrap();
        let gen = generator(dir.path(), None);
        let context = gen.communal_context(
            "coder",
            &bots(&["leader", "researcher"]),
            DispatchTarget::MultiBot,
            None,
            Some("# Memory Context\n- likes rust"),
            "user: hello\nassistant: hi",
        );
        assert!(context.starts_with("# You are @coder"));
        assert!(context.contains("Other bots present: leader, researcher"));
        assert!(context.contains("2-3 sentences"));
        assert!(context.contains("likes rust"));
        assert!(context.contains("## Relationships"));
        assert!(context.contains("## Recent Conversation"));
    }

    #[test]
    fn test_affinity_drives_tone() {
        let dir = tempdir().unwrap();
        let bot_dir = dir.path().join("bots/coder");
        std::fs::create_dir_all(&bot_dir).unwrap();
        std::fs::write(
            bot_dir.join("IDENTITY.md"),
            "## Relationships\n- researcher: 0.9\n- social: 0.2\n",
        )
        .unwrap();

        let gen = generator(dir.path(), None);
        let context = gen.communal_context(
            "coder",
            &bots(&["researcher", "social"]),
            DispatchTarget::MultiBot,
            None,
            None,
            "",
        );
        assert!(context.contains("@researcher: you usually back them up"));
        assert!(context.contains("@social: you tend to push back on them"));
    }

    #[test]
    fn test_crew_context_rules_differ() {
        let dir = tempdir().unwrap();
        let gen = generator(dir.path(), None);
        let context = gen.communal_context(
            "auditor",
            &bots(&["leader"]),
            DispatchTarget::CrewContext,
            None,
            None,
            "",
        );
        assert!(context.contains("selected as relevant"));
        assert!(!context.contains("## Relationships"));
    }
}
