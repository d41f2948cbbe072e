//! Bot dispatch with leader-first routing.
//!
//! By default a room message goes to the leader, who coordinates. Users can
//! bypass that with mentions: `@coder` goes straight to the coder, `@all`
//! fans out to every participant, `@team`/`@crew` picks the bots whose
//! domain keywords match the message. DMs always go to the addressed bot.

use std::sync::OnceLock;

use regex::Regex;

use crewgate_core::rooms::Room;

/// Who should receive the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchTarget {
    /// The leader coordinates; others may be delegated to.
    LeaderFirst,
    /// One specific bot answers alone.
    DirectBot,
    /// A direct message to one bot, outside any shared room.
    Dm,
    /// Several bots answer in parallel.
    MultiBot,
    /// Keyword-relevant bots answer alongside the leader.
    CrewContext,
}

/// The routing decision for one message.
#[derive(Clone, Debug)]
pub struct DispatchResult {
    pub target: DispatchTarget,
    pub primary_bot: String,
    pub secondary_bots: Vec<String>,
    pub room_id: Option<String>,
    pub reason: String,
}

/// Keyword sets used by `@team` relevance scoring.
const BOT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "coder",
        &["code", "programming", "bug", "fix", "python", "rust", "javascript", "api", "database", "sql", "function", "deploy", "test"],
    ),
    (
        "researcher",
        &["research", "data", "analyze", "market", "competitor", "trend", "survey", "study", "investigate", "report", "source"],
    ),
    (
        "creative",
        &["design", "visual", "logo", "brand", "color", "ui", "ux", "mockup", "image", "art", "style"],
    ),
    (
        "social",
        &["post", "tweet", "engagement", "audience", "viral", "hashtag", "content", "social", "media", "marketing", "community"],
    ),
    (
        "auditor",
        &["audit", "quality", "compliance", "security", "review", "check", "validate", "verify", "standard"],
    ),
];

/// Routes messages to bots.
pub struct BotDispatch {
    /// Every bot name the gateway knows about, leader included. Mentions of
    /// anything else are ignored.
    known_bots: Vec<String>,
}

impl BotDispatch {
    pub fn new(known_bots: Vec<String>) -> Self {
        Self { known_bots }
    }

    /// Decide who handles this message.
    pub fn dispatch(
        &self,
        message: &str,
        room: Option<&Room>,
        is_dm: bool,
        dm_target: Option<&str>,
    ) -> DispatchResult {
        let room_id = room.map(|r| r.id.clone());
        let participants: Vec<String> = room
            .map(|r| r.participants.clone())
            .unwrap_or_else(|| self.known_bots.clone());

        // DMs bypass everything, mentions included.
        if is_dm {
            if let Some(target) = dm_target {
                return DispatchResult {
                    target: DispatchTarget::Dm,
                    primary_bot: target.to_string(),
                    secondary_bots: Vec::new(),
                    room_id: None,
                    reason: format!("direct message to @{target}"),
                };
            }
        }

        let mentions = self.extract_mentions(message);

        if mentions.all {
            let secondary: Vec<String> = participants
                .iter()
                .filter(|p| *p != "leader")
                .cloned()
                .collect();
            return DispatchResult {
                target: DispatchTarget::MultiBot,
                primary_bot: "leader".into(),
                secondary_bots: secondary,
                room_id,
                reason: "@all mentioned, every participant responds".into(),
            };
        }

        if mentions.team {
            let relevant = select_relevant_bots(message, &participants);
            return DispatchResult {
                target: DispatchTarget::CrewContext,
                primary_bot: "leader".into(),
                secondary_bots: relevant,
                room_id,
                reason: "@team mentioned, relevant bots respond".into(),
            };
        }

        match mentions.bots.len() {
            1 => {
                let bot = mentions.bots[0].clone();
                DispatchResult {
                    target: DispatchTarget::DirectBot,
                    primary_bot: bot.clone(),
                    secondary_bots: Vec::new(),
                    room_id,
                    reason: format!("user tagged @{bot} directly"),
                }
            }
            n if n > 1 => DispatchResult {
                target: DispatchTarget::MultiBot,
                primary_bot: "leader".into(),
                secondary_bots: mentions.bots.clone(),
                room_id,
                reason: format!("multiple mentions: {}", mentions.bots.join(", ")),
            },
            _ => {
                let secondary: Vec<String> = participants
                    .iter()
                    .filter(|p| *p != "leader")
                    .cloned()
                    .collect();
                DispatchResult {
                    target: DispatchTarget::LeaderFirst,
                    primary_bot: "leader".into(),
                    secondary_bots: secondary,
                    room_id,
                    reason: "default: leader coordinates the response".into(),
                }
            }
        }
    }

    fn extract_mentions(&self, message: &str) -> Mentions {
        static MENTION: OnceLock<Regex> = OnceLock::new();
        let re =
            MENTION.get_or_init(|| Regex::new(r"@([A-Za-z][A-Za-z0-9_-]*)").expect("pattern compiles"));

        let mut mentions = Mentions::default();
        for caps in re.captures_iter(message) {
            let name = caps[1].to_lowercase();
            match name.as_str() {
                "all" | "everyone" => mentions.all = true,
                "team" | "crew" => mentions.team = true,
                other => {
                    // @coordinator is a standing alias for the leader.
                    let name = if other == "coordinator" {
                        "leader".to_string()
                    } else {
                        name.clone()
                    };
                    // Unknown bot names are treated as no-mention.
                    if self.known_bots.iter().any(|b| b.eq_ignore_ascii_case(&name))
                        && !mentions.bots.contains(&name)
                    {
                        mentions.bots.push(name);
                    }
                }
            }
        }
        mentions
    }
}

#[derive(Default)]
struct Mentions {
    all: bool,
    team: bool,
    bots: Vec<String>,
}

/// Score participants by keyword hits; fall back to the first three
/// non-leader participants when nothing matches.
fn select_relevant_bots(message: &str, participants: &[String]) -> Vec<String> {
    let message_lower = message.to_lowercase();

    let mut relevant: Vec<String> = participants
        .iter()
        .filter(|bot| *bot != "leader")
        .filter(|bot| {
            BOT_KEYWORDS
                .iter()
                .find(|(name, _)| name == &bot.as_str())
                .map(|(_, keywords)| keywords.iter().any(|kw| message_lower.contains(kw)))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if relevant.is_empty() {
        relevant = participants
            .iter()
            .filter(|b| *b != "leader")
            .take(3)
            .cloned()
            .collect();
    }
    relevant
}

// ─────────────────────────────────────────────
// Room-creation intent
// ─────────────────────────────────────────────

/// Detected request to create a room/workspace/project.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomCreationIntent {
    pub room_name: String,
    pub project_type: String,
}

/// Recognize phrasings like "create a room for the website project" or
/// "new workspace: marketing".
pub fn detect_room_creation(message: &str) -> Option<RoomCreationIntent> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?:create|make|start|set up)\s+(?:a\s+)?(?:new\s+)?room(?:\s+for)?(?:\s+the)?\s+(.+?)(?:\s+project)?$",
            r"(?:create|make|start|set up)\s+(?:a\s+)?(?:new\s+)?workspace(?:\s+for)?(?:\s+the)?\s+(.+?)(?:\s+project)?$",
            r"(?:create|make|start|set up)\s+(?:a\s+)?(?:new\s+)?project(?:\s+called)?\s*:?\s*(.+)",
            r"new\s+room\s*:\s*(.+)",
            r"new\s+workspace\s*:\s*(.+)",
            r"new\s+project\s*:\s*(.+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("pattern compiles"))
        .collect()
    });

    let message_lower = message.trim().to_lowercase();
    for pattern in patterns {
        if let Some(caps) = pattern.captures(&message_lower) {
            let room_name = caps[1].trim().to_string();
            if room_name.is_empty() {
                continue;
            }
            let project_type = infer_project_type(&room_name);
            return Some(RoomCreationIntent {
                room_name,
                project_type,
            });
        }
    }
    None
}

fn infer_project_type(name: &str) -> String {
    const TYPE_KEYWORDS: &[(&str, &str)] = &[
        ("website", "web"),
        ("web", "web"),
        ("app", "mobile"),
        ("mobile", "mobile"),
        ("research", "research"),
        ("analysis", "research"),
        ("audit", "audit"),
        ("security", "audit"),
        ("marketing", "marketing"),
        ("campaign", "marketing"),
        ("social", "social"),
        ("content", "content"),
    ];

    let name_lower = name.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(kw, _)| name_lower.contains(kw))
        .map(|(_, ty)| ty.to_string())
        .unwrap_or_else(|| "general".to_string())
}

/// Canonical initial participants for a project type.
pub fn suggest_bots_for_project(project_type: &str) -> Vec<String> {
    let bots: &[&str] = match project_type {
        "web" | "mobile" => &["leader", "coder", "creative"],
        "research" => &["leader", "researcher"],
        "audit" => &["leader", "auditor"],
        "marketing" => &["leader", "social", "creative"],
        "social" => &["leader", "social"],
        "content" => &["leader", "creative", "social"],
        _ => &["leader"],
    };
    bots.iter().map(|b| b.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewgate_core::rooms::RoomType;

    fn dispatcher() -> BotDispatch {
        BotDispatch::new(
            ["leader", "researcher", "coder", "social", "creative", "auditor"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn room(participants: &[&str]) -> Room {
        Room::new(
            "general",
            RoomType::Open,
            participants.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_dm_bypasses_mentions() {
        let d = dispatcher();
        let result = d.dispatch("@all hello", None, true, Some("coder"));
        assert_eq!(result.target, DispatchTarget::Dm);
        assert_eq!(result.primary_bot, "coder");
        assert!(result.secondary_bots.is_empty());
        assert!(result.room_id.is_none());
    }

    #[test]
    fn test_all_mention_fans_out() {
        let d = dispatcher();
        let r = room(&["leader", "researcher", "coder"]);
        let result = d.dispatch("@all what do you think?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::MultiBot);
        assert_eq!(result.primary_bot, "leader");
        assert_eq!(result.secondary_bots, vec!["researcher".to_string(), "coder".to_string()]);
    }

    #[test]
    fn test_everyone_alias() {
        let d = dispatcher();
        let r = room(&["leader", "coder"]);
        let result = d.dispatch("@everyone ping", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::MultiBot);
    }

    #[test]
    fn test_team_mention_selects_by_keywords() {
        let d = dispatcher();
        let r = room(&["leader", "researcher", "coder", "social"]);
        let result = d.dispatch("@team we need to fix this database bug", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::CrewContext);
        // "database" hits coder directly and researcher via "data".
        assert_eq!(
            result.secondary_bots,
            vec!["researcher".to_string(), "coder".to_string()]
        );
    }

    #[test]
    fn test_team_mention_no_keywords_takes_three() {
        let d = dispatcher();
        let r = room(&["leader", "researcher", "coder", "social", "creative"]);
        let result = d.dispatch("@team thoughts on the weather?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::CrewContext);
        assert_eq!(result.secondary_bots.len(), 3);
        assert!(!result.secondary_bots.contains(&"leader".to_string()));
    }

    #[test]
    fn test_crew_alias() {
        let d = dispatcher();
        let r = room(&["leader", "auditor"]);
        let result = d.dispatch("@crew security review please", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::CrewContext);
        assert_eq!(result.secondary_bots, vec!["auditor".to_string()]);
    }

    #[test]
    fn test_single_mention_goes_direct() {
        let d = dispatcher();
        let r = room(&["leader", "coder"]);
        let result = d.dispatch("@coder can you look at this?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::DirectBot);
        assert_eq!(result.primary_bot, "coder");
        assert!(result.secondary_bots.is_empty());
    }

    #[test]
    fn test_multiple_mentions_fan_out() {
        let d = dispatcher();
        let r = room(&["leader", "coder", "researcher"]);
        let result = d.dispatch("@coder @researcher pair up on this", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::MultiBot);
        assert_eq!(result.primary_bot, "leader");
        assert_eq!(result.secondary_bots, vec!["coder".to_string(), "researcher".to_string()]);
    }

    #[test]
    fn test_unknown_mention_falls_back_to_leader_first() {
        let d = dispatcher();
        let r = room(&["leader", "coder"]);
        let result = d.dispatch("@nobody what is this?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::LeaderFirst);
        assert_eq!(result.primary_bot, "leader");
        assert_eq!(result.secondary_bots, vec!["coder".to_string()]);
    }

    #[test]
    fn test_default_leader_first() {
        let d = dispatcher();
        let r = room(&["leader", "researcher", "coder"]);
        let result = d.dispatch("how is the project going?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::LeaderFirst);
        assert_eq!(result.primary_bot, "leader");
        assert_eq!(result.secondary_bots.len(), 2);
        assert_eq!(result.room_id.as_deref(), Some("general"));
    }

    #[test]
    fn test_mention_case_insensitive_and_deduped() {
        let d = dispatcher();
        let r = room(&["leader", "coder"]);
        let result = d.dispatch("@Coder @CODER please", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::DirectBot);
        assert_eq!(result.primary_bot, "coder");
    }

    #[test]
    fn test_coordinator_aliases_leader() {
        let d = dispatcher();
        let r = room(&["leader", "coder"]);
        let result = d.dispatch("@coordinator can you prioritize this?", Some(&r), false, None);
        assert_eq!(result.target, DispatchTarget::DirectBot);
        assert_eq!(result.primary_bot, "leader");
    }

    // ── Room creation intent ──

    #[test]
    fn test_detect_room_creation_phrasings() {
        for text in [
            "create a room for the website project",
            "make a new room website",
            "set up a workspace for the website",
            "new project: website",
        ] {
            let intent = detect_room_creation(text).unwrap_or_else(|| panic!("no match: {text}"));
            assert!(intent.room_name.contains("website"), "{text} -> {intent:?}");
            assert_eq!(intent.project_type, "web");
        }
    }

    #[test]
    fn test_detect_room_creation_none() {
        assert!(detect_room_creation("what rooms exist?").is_none());
        assert!(detect_room_creation("tell me about the project").is_none());
    }

    #[test]
    fn test_infer_project_types() {
        assert_eq!(infer_project_type("mobile app"), "mobile");
        assert_eq!(infer_project_type("security audit q3"), "audit");
        assert_eq!(infer_project_type("spring campaign"), "marketing");
        assert_eq!(infer_project_type("misc stuff"), "general");
    }

    #[test]
    fn test_suggest_bots_for_project() {
        assert_eq!(
            suggest_bots_for_project("web"),
            vec!["leader".to_string(), "coder".to_string(), "creative".to_string()]
        );
        assert_eq!(suggest_bots_for_project("research"), vec!["leader".to_string(), "researcher".to_string()]);
        assert_eq!(suggest_bots_for_project("unknown"), vec!["leader".to_string()]);
    }
}
