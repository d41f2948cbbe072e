//! Bot identity: personality files and role cards.
//!
//! Each bot owns a directory `bots/<name>/` inside the workspace holding
//! `SOUL.md` (persona), `IDENTITY.md` (display name, relationships),
//! `ROLE.md` (the role card: domain, definition of done, hard bans,
//! capability flags), and `AGENTS.md` (working agreements and tool
//! permissions). The role card is immutable at runtime; files are read at
//! prompt time.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Capability flags enforced before tool dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub can_invoke_bots: bool,
    pub can_access_web: bool,
    pub can_exec_commands: bool,
    pub can_send_messages: bool,
    pub can_do_heartbeat: bool,
    pub max_concurrent_tasks: usize,
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self {
            can_invoke_bots: false,
            can_access_web: true,
            can_exec_commands: false,
            can_send_messages: true,
            can_do_heartbeat: false,
            max_concurrent_tasks: 2,
        }
    }
}

/// A bot's role card, parsed from `ROLE.md`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleCard {
    pub name: String,
    pub display_name: String,
    pub domain: String,
    pub voice: String,
    pub definition_of_done: Vec<String>,
    /// Declarative prohibitions checked before any tool runs.
    pub hard_bans: Vec<String>,
    pub escalation_triggers: Vec<String>,
    #[serde(default)]
    pub capabilities: CapabilityFlags,
}

impl RoleCard {
    /// Whether a requested action trips a hard ban. Matching is plain
    /// case-insensitive substring — bans are written as short phrases like
    /// "delete production data".
    pub fn violates_hard_ban(&self, action: &str) -> Option<&str> {
        let action_lower = action.to_lowercase();
        self.hard_bans
            .iter()
            .find(|ban| !ban.is_empty() && action_lower.contains(&ban.to_lowercase()))
            .map(String::as_str)
    }
}

/// Everything loaded for one bot.
#[derive(Clone, Debug, Default)]
pub struct BotIdentity {
    pub name: String,
    pub role_card: RoleCard,
    pub soul: Option<String>,
    pub identity_md: Option<String>,
    pub agents_md: Option<String>,
    /// other bot → affinity in [0, 1].
    pub relationships: HashMap<String, f64>,
}

impl BotIdentity {
    pub fn display_name(&self) -> &str {
        if self.role_card.display_name.is_empty() {
            &self.name
        } else {
            &self.role_card.display_name
        }
    }

    pub fn affinity_with(&self, other: &str) -> f64 {
        self.relationships.get(other).copied().unwrap_or(0.5)
    }
}

/// Tone bucket derived from an affinity score.
pub fn affinity_bucket(score: f64) -> &'static str {
    if score >= 0.7 {
        "agree"
    } else if score <= 0.4 {
        "challenging"
    } else {
        "neutral"
    }
}

/// Loads personality files for bots under `<workspace>/bots/`.
#[derive(Clone, Debug)]
pub struct IdentityStore {
    workspace: PathBuf,
}

impl IdentityStore {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn bot_dir(&self, bot: &str) -> PathBuf {
        self.workspace.join("bots").join(bot)
    }

    fn read_file(&self, bot: &str, file: &str) -> Option<String> {
        let path = self.bot_dir(bot).join(file);
        if !path.is_file() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(bot = %bot, file = %file, error = %e, "failed to read personality file");
                None
            }
        }
    }

    /// Load a bot's full identity. Missing files yield defaults — a bot
    /// with no files at all still works, with a minimal role card.
    pub fn load(&self, bot: &str) -> BotIdentity {
        let soul = self.read_file(bot, "SOUL.md");
        let identity_md = self.read_file(bot, "IDENTITY.md");
        let agents_md = self.read_file(bot, "AGENTS.md");
        let role_md = self.read_file(bot, "ROLE.md");

        let mut role_card = role_md
            .as_deref()
            .map(parse_role_card)
            .unwrap_or_default();
        role_card.name = bot.to_string();

        let relationships = identity_md
            .as_deref()
            .map(parse_relationships)
            .unwrap_or_default();

        BotIdentity {
            name: bot.to_string(),
            role_card,
            soul,
            identity_md,
            agents_md,
            relationships,
        }
    }

    /// The persona text injected into prompts: SOUL.md, falling back to
    /// IDENTITY.md.
    pub fn persona(&self, bot: &str) -> Option<String> {
        self.read_file(bot, "SOUL.md")
            .or_else(|| self.read_file(bot, "IDENTITY.md"))
    }

    pub fn has_soul(&self, bot: &str) -> bool {
        self.bot_dir(bot).join("SOUL.md").is_file()
    }
}

// ─────────────────────────────────────────────
// Markdown parsing
// ─────────────────────────────────────────────

/// Parse a `ROLE.md` document into a role card.
///
/// Recognized sections (## headers, case-insensitive): Domain, Voice,
/// Display Name, Definition of Done, Hard Bans, Escalation, Capabilities.
/// List sections take `- item` bullets; Capabilities takes
/// `- flag_name: true/false` lines.
pub fn parse_role_card(markdown: &str) -> RoleCard {
    let mut card = RoleCard::default();
    let mut section = String::new();

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix("## ") {
            section = header.trim().to_lowercase();
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let bullet = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .map(str::trim);

        match section.as_str() {
            "domain" => append_line(&mut card.domain, trimmed),
            "voice" => append_line(&mut card.voice, trimmed),
            "display name" => card.display_name = trimmed.to_string(),
            "definition of done" => {
                if let Some(item) = bullet {
                    card.definition_of_done.push(item.to_string());
                }
            }
            "hard bans" => {
                if let Some(item) = bullet {
                    card.hard_bans.push(item.to_string());
                }
            }
            "escalation" | "escalation triggers" => {
                if let Some(item) = bullet {
                    card.escalation_triggers.push(item.to_string());
                }
            }
            "capabilities" => {
                if let Some(item) = bullet {
                    apply_capability(&mut card.capabilities, item);
                }
            }
            _ => {}
        }
    }

    card
}

fn append_line(target: &mut String, line: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(line);
}

fn apply_capability(caps: &mut CapabilityFlags, item: &str) {
    let Some((key, value)) = item.split_once(':') else {
        return;
    };
    let key = key.trim().to_lowercase();
    let value = value.trim().to_lowercase();
    let enabled = value == "true" || value == "yes";

    match key.as_str() {
        "can_invoke_bots" => caps.can_invoke_bots = enabled,
        "can_access_web" => caps.can_access_web = enabled,
        "can_exec_commands" => caps.can_exec_commands = enabled,
        "can_send_messages" => caps.can_send_messages = enabled,
        "can_do_heartbeat" => caps.can_do_heartbeat = enabled,
        "max_concurrent_tasks" => {
            if let Ok(n) = value.parse() {
                caps.max_concurrent_tasks = n;
            }
        }
        _ => {}
    }
}

/// Parse a `## Relationships` section from IDENTITY.md.
///
/// Lines look like `- researcher: 0.8 — trusts their data instincts`.
pub fn parse_relationships(markdown: &str) -> HashMap<String, f64> {
    let mut relationships = HashMap::new();
    let mut in_section = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix("## ") {
            in_section = header.trim().eq_ignore_ascii_case("relationships");
            continue;
        }
        if !in_section {
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        else {
            continue;
        };
        let Some((name, rest)) = item.split_once(':') else {
            continue;
        };
        let score_text = rest
            .trim()
            .split(|c: char| c.is_whitespace() || c == '—')
            .next()
            .unwrap_or("");
        if let Ok(score) = score_text.parse::<f64>() {
            relationships.insert(name.trim().to_lowercase(), score.clamp(0.0, 1.0));
        }
    }

    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ROLE_MD: &str = "\
# Coder

## Domain
Implementation, debugging, and code review.

## Display Name
Patch

## Voice
Dry, precise, allergic to hand-waving.

## Definition of Done
- Tests pass
- No clippy warnings

## Hard Bans
- delete production data
- force-push to main

## Escalation
- schema migrations

## Capabilities
- can_invoke_bots: false
- can_access_web: true
- can_exec_commands: true
- max_concurrent_tasks: 3
";

    #[test]
    fn test_parse_role_card() {
        let card = parse_role_card(ROLE_MD);
        assert_eq!(card.display_name, "Patch");
        assert!(card.domain.contains("debugging"));
        assert_eq!(card.definition_of_done.len(), 2);
        assert_eq!(card.hard_bans, vec!["delete production data", "force-push to main"]);
        assert_eq!(card.escalation_triggers, vec!["schema migrations"]);
        assert!(card.capabilities.can_exec_commands);
        assert!(!card.capabilities.can_invoke_bots);
        assert_eq!(card.capabilities.max_concurrent_tasks, 3);
    }

    #[test]
    fn test_hard_ban_matching() {
        let card = parse_role_card(ROLE_MD);
        assert!(card
            .violates_hard_ban("please Delete Production Data from the db")
            .is_some());
        assert!(card.violates_hard_ban("read the deployment logs").is_none());
    }

    #[test]
    fn test_parse_relationships() {
        let identity = "\
# Patch

## Relationships
- researcher: 0.8 — trusts their data instincts
- social: 0.3 — too much noise
- auditor: 0.55
";
        let rels = parse_relationships(identity);
        assert_eq!(rels.get("researcher"), Some(&0.8));
        assert_eq!(rels.get("social"), Some(&0.3));
        assert_eq!(rels.get("auditor"), Some(&0.55));
    }

    #[test]
    fn test_relationship_scores_clamped() {
        let rels = parse_relationships("## Relationships\n- x: 1.7\n- y: -0.2\n");
        assert_eq!(rels.get("x"), Some(&1.0));
        assert_eq!(rels.get("y"), Some(&0.0));
    }

    #[test]
    fn test_affinity_buckets() {
        assert_eq!(affinity_bucket(0.9), "agree");
        assert_eq!(affinity_bucket(0.7), "agree");
        assert_eq!(affinity_bucket(0.5), "neutral");
        assert_eq!(affinity_bucket(0.4), "challenging");
        assert_eq!(affinity_bucket(0.1), "challenging");
    }

    #[test]
    fn test_load_full_identity() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let bot_dir = store.bot_dir("coder");
        std::fs::create_dir_all(&bot_dir).unwrap();
        std::fs::write(bot_dir.join("ROLE.md"), ROLE_MD).unwrap();
        std::fs::write(bot_dir.join("SOUL.md"), "I am Patch. I ship.").unwrap();
        std::fs::write(
            bot_dir.join("IDENTITY.md"),
            "## Relationships\n- researcher: 0.8\n",
        )
        .unwrap();

        let identity = store.load("coder");
        assert_eq!(identity.display_name(), "Patch");
        assert_eq!(identity.soul.as_deref(), Some("I am Patch. I ship."));
        assert_eq!(identity.affinity_with("researcher"), 0.8);
        // Unknown bots default to neutral.
        assert_eq!(identity.affinity_with("stranger"), 0.5);
        assert!(store.has_soul("coder"));
    }

    #[test]
    fn test_load_missing_bot_defaults() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let identity = store.load("ghost");
        assert_eq!(identity.display_name(), "ghost");
        assert!(identity.soul.is_none());
        assert!(identity.role_card.hard_bans.is_empty());
        assert!(!store.has_soul("ghost"));
    }

    #[test]
    fn test_persona_prefers_soul() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let bot_dir = store.bot_dir("x");
        std::fs::create_dir_all(&bot_dir).unwrap();
        std::fs::write(bot_dir.join("IDENTITY.md"), "identity").unwrap();
        assert_eq!(store.persona("x").as_deref(), Some("identity"));
        std::fs::write(bot_dir.join("SOUL.md"), "soul").unwrap();
        assert_eq!(store.persona("x").as_deref(), Some("soul"));
    }
}
