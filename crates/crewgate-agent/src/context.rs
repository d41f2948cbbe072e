//! Context builder — composes the system prompt and the message list for a
//! provider call.
//!
//! Prompt order: identity block, the bot's personality files, the memory
//! context block, then current room/channel info. History and the user
//! message follow as separate messages.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use crewgate_core::rooms::Room;
use crewgate_core::types::{ChatMessage, ToolCall};

use crate::identity::IdentityStore;

pub struct ContextBuilder {
    identities: IdentityStore,
    gateway_name: String,
}

impl ContextBuilder {
    pub fn new(identities: IdentityStore, gateway_name: impl Into<String>) -> Self {
        Self {
            identities,
            gateway_name: gateway_name.into(),
        }
    }

    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Build the full system prompt for one bot in one room.
    pub fn build_system_prompt(
        &self,
        bot: &str,
        room: Option<&Room>,
        channel: &str,
        chat_id: &str,
        memory_context: Option<&str>,
        available_key_refs: &[String],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        let identity = self.identities.load(bot);
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        parts.push(format!(
            "# Identity\n\n\
             You are **{display}** (`{bot}`), a bot in the {gateway} gateway.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\n\
             Use your tools when they help; prefer tool output over guessing. \
             Keep replies grounded and concise.",
            display = identity.display_name(),
            gateway = self.gateway_name,
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
        ));

        for (label, content) in [
            ("SOUL.md", &identity.soul),
            ("IDENTITY.md", &identity.identity_md),
            ("AGENTS.md", &identity.agents_md),
        ] {
            if let Some(content) = content {
                parts.push(format!("## {label}\n\n{content}"));
            }
        }

        let card = &identity.role_card;
        if !card.domain.is_empty() || !card.hard_bans.is_empty() {
            let mut role = String::from("## Role\n");
            if !card.domain.is_empty() {
                role.push_str(&format!("\nDomain: {}\n", card.domain));
            }
            if !card.definition_of_done.is_empty() {
                role.push_str("\nDefinition of done:\n");
                for item in &card.definition_of_done {
                    role.push_str(&format!("- {item}\n"));
                }
            }
            if !card.hard_bans.is_empty() {
                role.push_str("\nHard bans (never do these):\n");
                for ban in &card.hard_bans {
                    role.push_str(&format!("- {ban}\n"));
                }
            }
            parts.push(role);
        }

        if let Some(memory) = memory_context {
            parts.push(memory.to_string());
        }

        let mut session_block = format!(
            "## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        );
        if let Some(room) = room {
            session_block.push_str(&format!(
                "\nRoom: {} ({:?})\nParticipants: {}",
                room.id,
                room.room_type,
                room.participants.join(", ")
            ));
        }
        if !available_key_refs.is_empty() {
            session_block.push_str(&format!(
                "\nStored credentials (pass these placeholders verbatim to tools): {}",
                available_key_refs.join(", ")
            ));
        }
        parts.push(session_block);

        parts.join("\n\n---\n\n")
    }

    /// Full message list: system prompt, history, current user message.
    pub fn build_messages(
        &self,
        system_prompt: String,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(user_text));
        messages
    }

    pub fn add_assistant_message(
        messages: &mut Vec<ChatMessage>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(ChatMessage::assistant(text));
            }
        } else {
            messages.push(ChatMessage::assistant_tool_calls(content, tool_calls));
        }
    }

    pub fn add_tool_result(messages: &mut Vec<ChatMessage>, tool_call_id: &str, result: &str) {
        messages.push(ChatMessage::tool_result(tool_call_id, result));
    }
}

/// Strip bracketed thinking blocks from user-visible text.
///
/// Handles `<thinking>…</thinking>`, `<think>…</think>`, and
/// `[thinking]…[/thinking]`. Reasoning content stays out of sessions and
/// replies; the audit log records it separately when enabled.
pub fn strip_thinking(text: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<thinking>.*?</thinking>|<think>.*?</think>|\[thinking\].*?\[/thinking\]")
            .expect("pattern compiles")
    });
    re.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewgate_core::rooms::RoomType;
    use tempfile::tempdir;

    fn builder(dir: &std::path::Path) -> ContextBuilder {
        ContextBuilder::new(IdentityStore::new(dir), "Crewgate")
    }

    #[test]
    fn test_system_prompt_minimal_bot() {
        let dir = tempdir().unwrap();
        let ctx = builder(dir.path());
        let prompt = ctx.build_system_prompt("leader", None, "cli", "direct", None, &[]);
        assert!(prompt.contains("**leader**"));
        assert!(prompt.contains("Channel: cli"));
        assert!(prompt.contains("Chat ID: direct"));
        assert!(!prompt.contains("Stored credentials"));
    }

    #[test]
    fn test_system_prompt_includes_personality_and_room() {
        let dir = tempdir().unwrap();
        let bot_dir = dir.path().join("bots/coder");
        std::fs::create_dir_all(&bot_dir).unwrap();
        std::fs::write(bot_dir.join("SOUL.md"), "I am Patch, I ship code.").unwrap();
        std::fs::write(
            bot_dir.join("ROLE.md"),
            "## Display Name\nPatch\n## Hard Bans\n- force-push to main\n",
        )
        .unwrap();

        let ctx = builder(dir.path());
        let room = Room::new(
            "abc-web",
            RoomType::Project,
            vec!["leader".into(), "coder".into()],
        );
        let prompt = ctx.build_system_prompt(
            "coder",
            Some(&room),
            "telegram",
            "chat9",
            Some("# Memory Context\n- user likes tabs"),
            &["{{brave_key}}".to_string()],
        );

        assert!(prompt.contains("**Patch**"));
        assert!(prompt.contains("I am Patch, I ship code."));
        assert!(prompt.contains("force-push to main"));
        assert!(prompt.contains("Room: abc-web"));
        assert!(prompt.contains("Participants: leader, coder"));
        assert!(prompt.contains("user likes tabs"));
        assert!(prompt.contains("{{brave_key}}"));
    }

    #[test]
    fn test_build_messages_order() {
        let dir = tempdir().unwrap();
        let ctx = builder(dir.path());
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        let messages = ctx.build_messages("system text".into(), &history, "now");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role(), "system");
        assert_eq!(messages[1].text(), "earlier");
        assert_eq!(messages[3].text(), "now");
    }

    #[test]
    fn test_add_assistant_message_variants() {
        let mut messages = Vec::new();
        ContextBuilder::add_assistant_message(&mut messages, Some("plain".into()), vec![]);
        ContextBuilder::add_assistant_message(
            &mut messages,
            None,
            vec![ToolCall::new("c1", "exec", "{}")],
        );
        // No content and no calls appends nothing.
        ContextBuilder::add_assistant_message(&mut messages, None, vec![]);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].tool_call_ids(), vec!["c1"]);
    }

    #[test]
    fn test_strip_thinking_variants() {
        assert_eq!(
            strip_thinking("<thinking>hmm let me see</thinking>The answer is 4."),
            "The answer is 4."
        );
        assert_eq!(strip_thinking("<think>a\nb\nc</think>ok"), "ok");
        assert_eq!(strip_thinking("[thinking]internal[/thinking] done"), "done");
        assert_eq!(strip_thinking("no markers here"), "no markers here");
    }

    #[test]
    fn test_strip_thinking_multiple_blocks() {
        let text = "<thinking>one</thinking>first <thinking>two</thinking>second";
        assert_eq!(strip_thinking(text), "first second");
    }
}
