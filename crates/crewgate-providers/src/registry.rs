//! Provider registry — static specs for the supported LLM backends.
//!
//! Each `ProviderSpec` describes how to reach one backend: keywords for
//! model matching, model-name prefixing rules, gateway detection, and
//! per-model parameter overrides. Idiosyncrasies live here as data so the
//! HTTP adapter stays generic.

use std::collections::HashMap;

pub use crewgate_core::config::schema::ProviderConfig;

// ─────────────────────────────────────────────
// ProviderSpec
// ─────────────────────────────────────────────

/// Static description of one LLM backend.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Internal name, matching the config section (e.g. `"openrouter"`).
    pub name: &'static str,
    /// Lowercase keywords matched against model names.
    pub keywords: &'static [&'static str],
    /// Environment variable conventionally holding the API key.
    pub env_key: &'static str,
    pub display_name: &'static str,
    /// Prefix prepended to model names for API routing.
    pub prefix: Option<&'static str>,
    /// Prefixes that suppress re-prefixing when already present.
    pub skip_prefixes: &'static [&'static str],
    /// Gateways/aggregators act as fallback when no direct match exists.
    pub is_gateway: bool,
    /// Self-hosted backends are never keyword-matched.
    pub is_local: bool,
    /// Auto-detect this provider when the API key starts with this prefix.
    pub detect_by_key_prefix: Option<&'static str>,
    pub default_api_base: Option<&'static str>,
    /// Per-model request parameter overrides.
    pub model_overrides: &'static [ModelOverride],
}

/// One pattern-matched parameter override.
#[derive(Clone, Debug)]
pub struct ModelOverride {
    /// Substring matched against the lowercase model name.
    pub pattern: &'static str,
    pub action: OverrideAction,
}

#[derive(Clone, Debug)]
pub enum OverrideAction {
    /// Force the temperature to this value.
    ForceTemperature(f64),
    /// Omit the temperature parameter entirely (reasoning models that
    /// reject it).
    DropTemperature,
}

// ─────────────────────────────────────────────
// The registry, in matching priority order
// ─────────────────────────────────────────────

pub static PROVIDERS: &[ProviderSpec] = &[
    // Gateway, detected by the sk-or- key prefix.
    ProviderSpec {
        name: "openrouter",
        keywords: &["openrouter"],
        env_key: "OPENROUTER_API_KEY",
        display_name: "OpenRouter",
        prefix: Some("openrouter"),
        skip_prefixes: &["openrouter/"],
        is_gateway: true,
        is_local: false,
        detect_by_key_prefix: Some("sk-or-"),
        default_api_base: Some("https://openrouter.ai/api/v1"),
        model_overrides: &[],
    },
    ProviderSpec {
        name: "anthropic",
        keywords: &["anthropic", "claude"],
        env_key: "ANTHROPIC_API_KEY",
        display_name: "Anthropic",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: None,
        model_overrides: &[],
    },
    ProviderSpec {
        name: "openai",
        keywords: &["openai", "gpt", "o1", "o3"],
        env_key: "OPENAI_API_KEY",
        display_name: "OpenAI",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: None,
        // o-series reasoning models reject a temperature parameter.
        model_overrides: &[
            ModelOverride {
                pattern: "o1",
                action: OverrideAction::DropTemperature,
            },
            ModelOverride {
                pattern: "o3",
                action: OverrideAction::DropTemperature,
            },
        ],
    },
    ProviderSpec {
        name: "deepseek",
        keywords: &["deepseek"],
        env_key: "DEEPSEEK_API_KEY",
        display_name: "DeepSeek",
        prefix: Some("deepseek"),
        skip_prefixes: &["deepseek/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: None,
        model_overrides: &[],
    },
    ProviderSpec {
        name: "gemini",
        keywords: &["gemini"],
        env_key: "GEMINI_API_KEY",
        display_name: "Gemini",
        prefix: Some("gemini"),
        skip_prefixes: &["gemini/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: None,
        model_overrides: &[],
    },
    // Kimi K2.5 requires temperature = 1.0.
    ProviderSpec {
        name: "moonshot",
        keywords: &["moonshot", "kimi"],
        env_key: "MOONSHOT_API_KEY",
        display_name: "Moonshot",
        prefix: Some("moonshot"),
        skip_prefixes: &["moonshot/", "openrouter/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: Some("https://api.moonshot.ai/v1"),
        model_overrides: &[ModelOverride {
            pattern: "kimi-k2.5",
            action: OverrideAction::ForceTemperature(1.0),
        }],
    },
    ProviderSpec {
        name: "groq",
        keywords: &["groq"],
        env_key: "GROQ_API_KEY",
        display_name: "Groq",
        prefix: Some("groq"),
        skip_prefixes: &["groq/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: None,
        model_overrides: &[],
    },
    ProviderSpec {
        name: "vllm",
        keywords: &["vllm"],
        env_key: "HOSTED_VLLM_API_KEY",
        display_name: "vLLM",
        prefix: Some("hosted_vllm"),
        skip_prefixes: &["hosted_vllm/"],
        is_gateway: false,
        is_local: true,
        detect_by_key_prefix: None,
        default_api_base: None,
        model_overrides: &[],
    },
];

// ─────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────

/// Keyword-match a model to a direct provider. Gateways and local backends
/// are skipped — they're fallback only.
pub fn find_by_model(model: &str) -> Option<&'static ProviderSpec> {
    let model_lower = model.to_lowercase();
    PROVIDERS.iter().find(|spec| {
        !spec.is_gateway
            && !spec.is_local
            && spec.keywords.iter().any(|kw| model_lower.contains(kw))
    })
}

pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

/// Detect a gateway/local provider by explicit name or key prefix.
pub fn find_gateway(
    provider_name: Option<&str>,
    api_key: Option<&str>,
) -> Option<&'static ProviderSpec> {
    if let Some(name) = provider_name {
        if let Some(spec) = PROVIDERS
            .iter()
            .find(|s| s.name == name && (s.is_gateway || s.is_local))
        {
            return Some(spec);
        }
    }
    if let Some(key) = api_key {
        if let Some(spec) = PROVIDERS.iter().find(|s| {
            s.detect_by_key_prefix
                .is_some_and(|pfx| key.starts_with(pfx))
        }) {
            return Some(spec);
        }
    }
    None
}

/// Apply the spec's prefixing rules to a model name.
pub fn resolve_model_name(model: &str, spec: &ProviderSpec) -> String {
    if let Some(prefix) = spec.prefix {
        let already = spec.skip_prefixes.iter().any(|sp| model.starts_with(sp));
        if !already {
            return format!("{prefix}/{model}");
        }
    }
    model.to_string()
}

/// Apply per-model overrides to the temperature. `None` means the
/// parameter must be omitted from the request.
pub fn apply_model_overrides(model: &str, spec: &ProviderSpec, temperature: f64) -> Option<f64> {
    let model_lower = model.to_lowercase();
    let mut temp = Some(temperature);
    for ovr in spec.model_overrides {
        if model_lower.contains(ovr.pattern) {
            temp = match ovr.action {
                OverrideAction::ForceTemperature(v) => Some(v),
                OverrideAction::DropTemperature => None,
            };
        }
    }
    temp
}

/// Match a model to a configured provider: direct keyword match first, then
/// the first configured gateway.
pub fn match_provider<'a>(
    model: &str,
    providers: &'a HashMap<String, ProviderConfig>,
) -> Option<(&'a ProviderConfig, &'static ProviderSpec)> {
    if let Some(spec) = find_by_model(model) {
        if let Some(config) = providers.get(spec.name) {
            if config.is_configured() {
                return Some((config, spec));
            }
        }
    }

    PROVIDERS.iter().filter(|s| s.is_gateway).find_map(|spec| {
        providers
            .get(spec.name)
            .filter(|c| c.is_configured())
            .map(|c| (c, spec))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_model() {
        assert_eq!(find_by_model("claude-sonnet-4-20250514").unwrap().name, "anthropic");
        assert_eq!(find_by_model("gpt-4o-mini").unwrap().name, "openai");
        assert_eq!(find_by_model("deepseek-chat").unwrap().name, "deepseek");
        assert_eq!(find_by_model("gemini-2.0-flash").unwrap().name, "gemini");
        assert_eq!(find_by_model("kimi-k2.5-preview").unwrap().name, "moonshot");
        assert_eq!(find_by_model("groq/llama-3.3-70b").unwrap().name, "groq");
        assert!(find_by_model("mystery-model-xyz").is_none());
    }

    #[test]
    fn test_gateway_not_keyword_matched() {
        // "openrouter/anthropic/..." matches anthropic, never the gateway.
        assert_eq!(
            find_by_model("openrouter/anthropic/claude-3").unwrap().name,
            "anthropic"
        );
    }

    #[test]
    fn test_find_gateway() {
        assert_eq!(find_gateway(None, Some("sk-or-abc")).unwrap().name, "openrouter");
        assert_eq!(find_gateway(Some("vllm"), None).unwrap().name, "vllm");
        assert!(find_gateway(None, Some("sk-plain")).is_none());
        // Direct providers are not gateways.
        assert!(find_gateway(Some("anthropic"), None).is_none());
    }

    #[test]
    fn test_resolve_model_name() {
        let deepseek = find_by_name("deepseek").unwrap();
        assert_eq!(resolve_model_name("deepseek-chat", deepseek), "deepseek/deepseek-chat");
        assert_eq!(
            resolve_model_name("deepseek/deepseek-chat", deepseek),
            "deepseek/deepseek-chat"
        );

        let anthropic = find_by_name("anthropic").unwrap();
        assert_eq!(
            resolve_model_name("claude-sonnet-4-20250514", anthropic),
            "claude-sonnet-4-20250514"
        );
    }

    #[test]
    fn test_override_force_temperature() {
        let moonshot = find_by_name("moonshot").unwrap();
        assert_eq!(apply_model_overrides("kimi-k2.5-preview", moonshot, 0.7), Some(1.0));
        assert_eq!(apply_model_overrides("moonshot-v1", moonshot, 0.7), Some(0.7));
    }

    #[test]
    fn test_override_drop_temperature() {
        let openai = find_by_name("openai").unwrap();
        assert_eq!(apply_model_overrides("o1-preview", openai, 0.7), None);
        assert_eq!(apply_model_overrides("o3-mini", openai, 0.2), None);
        assert_eq!(apply_model_overrides("gpt-4o", openai, 0.2), Some(0.2));
    }

    #[test]
    fn test_match_provider_direct() {
        let mut providers = HashMap::new();
        providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                api_key: "sk-ant-1".into(),
                ..Default::default()
            },
        );
        let (config, spec) = match_provider("claude-sonnet-4-20250514", &providers).unwrap();
        assert_eq!(spec.name, "anthropic");
        assert_eq!(config.api_key, "sk-ant-1");
    }

    #[test]
    fn test_match_provider_gateway_fallback() {
        let mut providers = HashMap::new();
        providers.insert(
            "openrouter".to_string(),
            ProviderConfig {
                api_key: "sk-or-1".into(),
                ..Default::default()
            },
        );
        let (_, spec) = match_provider("mystery-model", &providers).unwrap();
        assert_eq!(spec.name, "openrouter");
    }

    #[test]
    fn test_match_provider_unconfigured() {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), ProviderConfig::default());
        assert!(match_provider("claude-3", &providers).is_none());
    }

    #[test]
    fn test_unique_names() {
        let mut names: Vec<&str> = PROVIDERS.iter().map(|s| s.name).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
