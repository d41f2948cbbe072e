//! Configuration schema.
//!
//! JSON on disk uses camelCase keys; Rust uses snake_case, bridged with
//! `#[serde(rename_all = "camelCase")]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration — `~/.crewgate/config.json` plus env overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub routing: RoutingConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
    pub security: SecurityConfig,
    pub routines: RoutinesConfig,
    pub team: TeamConfig,
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            defaults: AgentDefaults::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    pub workspace: String,
    /// Fallback model when routing is disabled or fails.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Max LLM ↔ tool iterations per inbound message.
    pub max_tool_iterations: u32,
    /// Stream the first iteration when the provider supports it.
    pub stream: bool,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.crewgate/workspace".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            stream: false,
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// One LLM backend's credentials and endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key. May hold the `__KEYRING__` marker on disk; the loader
    /// resolves it before the config is handed out.
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub deepseek: ProviderConfig,
    #[serde(default)]
    pub groq: ProviderConfig,
    #[serde(default)]
    pub gemini: ProviderConfig,
    #[serde(default)]
    pub moonshot: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "openrouter" => Some(&self.openrouter),
            "deepseek" => Some(&self.deepseek),
            "groq" => Some(&self.groq),
            "gemini" => Some(&self.gemini),
            "moonshot" => Some(&self.moonshot),
            "vllm" => Some(&self.vllm),
            _ => None,
        }
    }

    pub fn get_by_name_mut(&mut self, name: &str) -> Option<&mut ProviderConfig> {
        match name {
            "anthropic" => Some(&mut self.anthropic),
            "openai" => Some(&mut self.openai),
            "openrouter" => Some(&mut self.openrouter),
            "deepseek" => Some(&mut self.deepseek),
            "groq" => Some(&mut self.groq),
            "gemini" => Some(&mut self.gemini),
            "moonshot" => Some(&mut self.moonshot),
            "vllm" => Some(&mut self.vllm),
            _ => None,
        }
    }

    pub const NAMES: &'static [&'static str] = &[
        "anthropic",
        "openai",
        "openrouter",
        "deepseek",
        "groq",
        "gemini",
        "moonshot",
        "vllm",
    ];

    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        Self::NAMES
            .iter()
            .filter_map(|name| self.get_by_name(name).map(|c| (name.to_string(), c.clone())))
            .collect()
    }

    /// Whether any provider has a usable credential (the configuration gate).
    pub fn any_configured(&self) -> bool {
        Self::NAMES
            .iter()
            .any(|name| self.get_by_name(name).map_or(false, |c| c.is_configured()))
    }
}

// ─────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub enabled: bool,
    /// Rule-classifier confidence needed to stop at layer 1.
    pub min_confidence: f64,
    /// Sticky-tier confidence needed to stay on the recent tier.
    pub downgrade_confidence: f64,
    /// Small model used by the LLM-assisted layer; empty disables it.
    pub classifier_model: String,
    pub classifier_timeout_ms: u64,
    pub tiers: TiersConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.85,
            downgrade_confidence: 0.9,
            classifier_model: String::new(),
            classifier_timeout_ms: 500,
            tiers: TiersConfig::default(),
        }
    }
}

/// Per-tier model pair. Exactly one active pair per tier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierModels {
    pub primary_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_model: Option<String>,
    pub cost_per_mtok: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TiersConfig {
    pub simple: TierModels,
    pub medium: TierModels,
    pub complex: TierModels,
    pub reasoning: TierModels,
    pub coding: TierModels,
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// "summary", "token-limit", or "off".
    pub compaction_mode: String,
    pub threshold_percent: f64,
    pub max_context_tokens: usize,
    pub preserve_recent: usize,
    pub summary_chunk_size: usize,
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            compaction_mode: "summary".to_string(),
            threshold_percent: 0.8,
            max_context_tokens: 8192,
            preserve_recent: 20,
            summary_chunk_size: 10,
            history_window: 50,
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Keep filesystem/shell tools inside the workspace.
    pub restrict_to_workspace: bool,
    /// Evolutionary mode: only these paths are touchable. Empty = standard
    /// workspace scoping.
    pub allowed_paths: Vec<String>,
    /// Always-denied paths, applied on top of either mode.
    pub protected_paths: Vec<String>,
    pub exec_timeout_s: u64,
    /// Brave Search credential, usually the `{{brave_key}}` symbolic ref.
    pub brave_api_key: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            restrict_to_workspace: true,
            allowed_paths: Vec::new(),
            protected_paths: vec!["~/.crewgate/config.json".to_string()],
            exec_timeout_s: 60,
            brave_api_key: "{{brave_key}}".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Keyring service name.
    pub keyring_service: String,
    /// Audit log path; empty means `~/.crewgate/audit.log`.
    pub audit_log_path: String,
    /// Record model reasoning content in the audit log.
    pub log_reasoning: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            keyring_service: "crewgate".to_string(),
            audit_log_path: String::new(),
            log_reasoning: false,
        }
    }
}

// ─────────────────────────────────────────────
// Routines
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutinesConfig {
    pub enabled: bool,
    pub default_interval_s: u64,
    pub retain_history_count: usize,
}

impl Default for RoutinesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_interval_s: 30 * 60,
            retain_history_count: 50,
        }
    }
}

// ─────────────────────────────────────────────
// Team
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamConfig {
    /// Preset name: pirate_crew, rock_band, space_crew, executive_suite,
    /// swat_team, feral_clowder.
    pub name: String,
    /// Known specialist bots (the leader is implicit).
    pub bots: Vec<String>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            name: "pirate_crew".to_string(),
            bots: vec![
                "researcher".to_string(),
                "coder".to_string(),
                "social".to_string(),
                "creative".to_string(),
                "auditor".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agents.defaults.max_tool_iterations, 20);
        assert_eq!(config.routing.min_confidence, 0.85);
        assert_eq!(config.session.threshold_percent, 0.8);
        assert_eq!(config.tools.exec_timeout_s, 60);
        assert!(!config.providers.any_configured());
    }

    #[test]
    fn test_camel_case_round_trip() {
        let mut config = Config::default();
        config.providers.openrouter.api_key = "sk-or-test".into();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["agents"]["defaults"]["maxTokens"].is_number());
        assert_eq!(json["providers"]["openrouter"]["apiKey"], "sk-or-test");

        let back: Config = serde_json::from_value(json).unwrap();
        assert!(back.providers.any_configured());
        assert!(back.providers.openrouter.is_configured());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = serde_json::json!({
            "agents": { "defaults": { "model": "gpt-4o" } }
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.agents.defaults.model, "gpt-4o");
        assert_eq!(config.agents.defaults.max_tokens, 8192);
    }

    #[test]
    fn test_provider_lookup() {
        let mut config = ProvidersConfig::default();
        config.deepseek.api_key = "dsk-1".into();
        assert!(config.get_by_name("deepseek").unwrap().is_configured());
        assert!(config.get_by_name("unknown").is_none());
        assert_eq!(config.to_map().len(), ProvidersConfig::NAMES.len());
    }

    #[test]
    fn test_team_defaults() {
        let team = TeamConfig::default();
        assert_eq!(team.name, "pirate_crew");
        assert!(team.bots.contains(&"coder".to_string()));
    }
}
