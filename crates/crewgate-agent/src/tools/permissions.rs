//! Per-bot tool permissions, parsed from personality files.
//!
//! SOUL.md or AGENTS.md may carry `## Allowed Tools`, `## Denied Tools`,
//! and `## Custom Tools` sections. Semantics: a tool is visible iff the
//! allowed set is empty or contains it, and the denied set does not.
//! Custom entries override the description advertised to the model.

use std::collections::{HashMap, HashSet};

/// Effective tool permissions for one bot.
#[derive(Clone, Debug, Default)]
pub struct ToolPermissions {
    pub allowed: HashSet<String>,
    pub denied: HashSet<String>,
    pub custom_descriptions: HashMap<String, String>,
}

impl ToolPermissions {
    /// Everything visible.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// `allowed` non-empty acts as an allowlist; `denied` always wins.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        if self.denied.contains(tool_name) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(tool_name)
    }

    pub fn description_override(&self, tool_name: &str) -> Option<&str> {
        self.custom_descriptions.get(tool_name).map(String::as_str)
    }

    /// Merge sections from several personality files (SOUL then AGENTS);
    /// later files add to earlier ones.
    pub fn merge(&mut self, other: ToolPermissions) {
        self.allowed.extend(other.allowed);
        self.denied.extend(other.denied);
        self.custom_descriptions.extend(other.custom_descriptions);
    }
}

/// Parse permission sections out of a personality markdown file.
pub fn parse_permissions(markdown: &str) -> ToolPermissions {
    #[derive(PartialEq)]
    enum Section {
        None,
        Allowed,
        Denied,
        Custom,
    }

    let mut perms = ToolPermissions::default();
    let mut section = Section::None;

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix("## ") {
            section = match header.trim().to_lowercase().as_str() {
                "allowed tools" => Section::Allowed,
                "denied tools" => Section::Denied,
                "custom tools" => Section::Custom,
                _ => Section::None,
            };
            continue;
        }
        if section == Section::None {
            continue;
        }
        let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .map(str::trim)
        else {
            continue;
        };
        if item.is_empty() {
            continue;
        }

        match section {
            Section::Allowed => {
                perms.allowed.insert(item.to_string());
            }
            Section::Denied => {
                perms.denied.insert(item.to_string());
            }
            Section::Custom => {
                // `- name: custom description`
                if let Some((name, desc)) = item.split_once(':') {
                    perms
                        .custom_descriptions
                        .insert(name.trim().to_string(), desc.trim().to_string());
                }
            }
            Section::None => {}
        }
    }

    perms
}

/// Combined permissions from a bot's SOUL.md and AGENTS.md.
pub fn permissions_for_bot(
    soul: Option<&str>,
    agents: Option<&str>,
) -> ToolPermissions {
    let mut perms = soul.map(parse_permissions).unwrap_or_default();
    if let Some(agents) = agents {
        perms.merge(parse_permissions(agents));
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allows_everything() {
        let perms = ToolPermissions::allow_all();
        assert!(perms.is_allowed("exec"));
        assert!(perms.is_allowed("anything"));
    }

    #[test]
    fn test_allowlist_semantics() {
        let perms = parse_permissions("## Allowed Tools\n- read_file\n- web_search\n");
        assert!(perms.is_allowed("read_file"));
        assert!(perms.is_allowed("web_search"));
        assert!(!perms.is_allowed("exec"));
    }

    #[test]
    fn test_denied_wins_over_allowed() {
        let perms = parse_permissions(
            "## Allowed Tools\n- exec\n- read_file\n\n## Denied Tools\n- exec\n",
        );
        assert!(!perms.is_allowed("exec"));
        assert!(perms.is_allowed("read_file"));
    }

    #[test]
    fn test_denylist_only() {
        let perms = parse_permissions("## Denied Tools\n- exec\n- invoke\n");
        assert!(!perms.is_allowed("exec"));
        assert!(!perms.is_allowed("invoke"));
        assert!(perms.is_allowed("web_search"));
    }

    #[test]
    fn test_custom_descriptions() {
        let perms = parse_permissions(
            "## Custom Tools\n- web_search: Search, but cite sources in every result.\n",
        );
        assert_eq!(
            perms.description_override("web_search"),
            Some("Search, but cite sources in every result.")
        );
        assert!(perms.description_override("exec").is_none());
    }

    #[test]
    fn test_sections_end_at_next_header() {
        let perms = parse_permissions(
            "## Denied Tools\n- exec\n\n## Notes\n- this is not a tool\n",
        );
        assert!(!perms.is_allowed("exec"));
        assert!(perms.is_allowed("this is not a tool"));
    }

    #[test]
    fn test_merge_soul_and_agents() {
        let perms = permissions_for_bot(
            Some("## Denied Tools\n- exec\n"),
            Some("## Denied Tools\n- invoke\n## Custom Tools\n- message: Short replies only.\n"),
        );
        assert!(!perms.is_allowed("exec"));
        assert!(!perms.is_allowed("invoke"));
        assert_eq!(perms.description_override("message"), Some("Short replies only."));
    }
}
