//! Tier-based model routing.
//!
//! A message is classified into one of five tiers; each tier maps to a
//! primary/secondary model pair from configuration. Classification is
//! layered and stops at the first confident answer:
//!
//! 1. rule classifier (deterministic patterns),
//! 2. sticky tier from the recent conversation,
//! 3. LLM-assisted tag via a small model with a hard timeout,
//! 4. default `Medium`.
//!
//! Routing failures are never fatal to an inbound message — anything
//! unexpected falls back to the default model at tier `Medium`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crewgate_core::config::schema::{RoutingConfig, TierModels};
use crewgate_core::types::{ChatMessage, Session};

use crate::traits::{LlmProvider, LlmRequestConfig};

/// Session metadata keys carrying the sticky routing state.
pub const META_TIER: &str = "routing_tier";
pub const META_CONFIDENCE: &str = "routing_confidence";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Simple,
    Medium,
    Complex,
    Reasoning,
    Coding,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Simple => "simple",
            Tier::Medium => "medium",
            Tier::Complex => "complex",
            Tier::Reasoning => "reasoning",
            Tier::Coding => "coding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Some(Tier::Simple),
            "medium" => Some(Tier::Medium),
            "complex" => Some(Tier::Complex),
            "reasoning" => Some(Tier::Reasoning),
            "coding" => Some(Tier::Coding),
            _ => None,
        }
    }
}

/// The routing outcome for one inbound message.
#[derive(Clone, Debug)]
pub struct RouteDecision {
    pub model: String,
    pub tier: Tier,
    pub confidence: f64,
    /// Which layer decided: "rules", "sticky", "llm", or "default".
    pub source: &'static str,
}

pub struct Router {
    config: RoutingConfig,
    default_model: String,
    /// Small model backend for the LLM-assisted layer.
    classifier: Option<Arc<dyn LlmProvider>>,
}

impl Router {
    pub fn new(config: RoutingConfig, default_model: impl Into<String>) -> Self {
        Self {
            config,
            default_model: default_model.into(),
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.classifier = Some(provider);
        self
    }

    /// Pick `(model, tier)` for an inbound message. Never fails.
    pub async fn select(&self, content: &str, session: &Session) -> RouteDecision {
        if !self.config.enabled {
            return self.decision(Tier::Medium, 1.0, "default");
        }

        // 1. Deterministic rules.
        let (rule_tier, rule_confidence) = rule_classify(content);
        if rule_confidence >= self.config.min_confidence {
            return self.decision(rule_tier, rule_confidence, "rules");
        }

        // 2. Sticky: stay on the recent tier when it was confident and the
        //    current message doesn't clearly say otherwise.
        if let Some((tier, confidence)) = sticky_tier(session) {
            if confidence >= self.config.downgrade_confidence {
                return self.decision(tier, confidence, "sticky");
            }
        }

        // 3. LLM-assisted tag, bounded by the classifier timeout.
        if let Some(tier) = self.llm_classify(content).await {
            return self.decision(tier, 0.75, "llm");
        }

        // 4. Default.
        self.decision(Tier::Medium, 0.5, "default")
    }

    /// The configured secondary model for a tier, for transport-failure
    /// retry.
    pub fn secondary_for(&self, tier: Tier) -> Option<String> {
        self.tier_models(tier)
            .secondary_model
            .clone()
            .filter(|m| !m.is_empty())
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn decision(&self, tier: Tier, confidence: f64, source: &'static str) -> RouteDecision {
        let models = self.tier_models(tier);
        let model = if models.primary_model.is_empty() {
            self.default_model.clone()
        } else {
            models.primary_model.clone()
        };
        debug!(tier = tier.as_str(), model = %model, source = source, "route selected");
        RouteDecision {
            model,
            tier,
            confidence,
            source,
        }
    }

    fn tier_models(&self, tier: Tier) -> &TierModels {
        match tier {
            Tier::Simple => &self.config.tiers.simple,
            Tier::Medium => &self.config.tiers.medium,
            Tier::Complex => &self.config.tiers.complex,
            Tier::Reasoning => &self.config.tiers.reasoning,
            Tier::Coding => &self.config.tiers.coding,
        }
    }

    async fn llm_classify(&self, content: &str) -> Option<Tier> {
        let classifier = self.classifier.as_ref()?;
        if self.config.classifier_model.is_empty() {
            return None;
        }

        let prompt = format!(
            "Classify this chat message into exactly one tier: \
             simple, medium, complex, reasoning, or coding.\n\
             Reply with the single tier word and nothing else.\n\n\
             Message:\n{content}"
        );
        let messages = [ChatMessage::user(prompt)];
        let request = LlmRequestConfig {
            max_tokens: 8,
            temperature: 0.0,
        };

        let call = classifier.chat(&messages, None, &self.config.classifier_model, &request);
        let timeout = Duration::from_millis(self.config.classifier_timeout_ms);
        match tokio::time::timeout(timeout, call).await {
            Ok(response) => {
                let text = response.content.unwrap_or_default();
                let tier = Tier::parse(&text);
                if tier.is_none() {
                    warn!(reply = %text, "classifier returned an unknown tier");
                }
                tier
            }
            Err(_) => {
                debug!("classifier timed out, falling through");
                None
            }
        }
    }
}

/// Layer 2: the tier stored by the previous turn, if any.
fn sticky_tier(session: &Session) -> Option<(Tier, f64)> {
    let tier = Tier::parse(session.metadata.get(META_TIER)?)?;
    let confidence = session
        .metadata
        .get(META_CONFIDENCE)
        .and_then(|c| c.parse::<f64>().ok())
        .unwrap_or(0.0);
    Some((tier, confidence))
}

// ─────────────────────────────────────────────
// Layer 1: rule classifier
// ─────────────────────────────────────────────

fn coding_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)```|stack trace|traceback|compile error|\bfn\s+\w+|\bdef\s+\w+|\bclass\s+\w+|segfault|\b(rust|python|javascript|typescript|golang|sql)\b|refactor|unit test|debug this",
        )
        .expect("pattern compiles")
    })
}

fn reasoning_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bprove\b|step by step|\bwhy does\b|\bderive\b|\btheorem\b|think through|logic puzzle")
            .expect("pattern compiles")
    })
}

fn complex_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\barchitect|\bdesign a\b|\bstrategy\b|\broadmap\b|\bmigrate\b|trade-?offs|\bcompare\b.+\band\b")
            .expect("pattern compiles")
    })
}

/// Deterministic tier guess with a confidence score.
pub fn rule_classify(content: &str) -> (Tier, f64) {
    let trimmed = content.trim();
    let lower = trimmed.to_lowercase();

    // Short pleasantries and acknowledgements.
    const GREETINGS: &[&str] = &[
        "hi", "hello", "hey", "yo", "thanks", "thank you", "ok", "okay", "yes", "no", "good morning",
        "good night", "bye",
    ];
    if trimmed.len() <= 24 {
        let normalized = lower.trim_end_matches(['!', '.', '?', ' ']);
        if GREETINGS.contains(&normalized) {
            return (Tier::Simple, 0.95);
        }
    }
    if trimmed.chars().count() < 12 {
        return (Tier::Simple, 0.86);
    }

    if coding_pattern().is_match(trimmed) {
        return (Tier::Coding, 0.9);
    }
    if reasoning_pattern().is_match(trimmed) {
        return (Tier::Reasoning, 0.87);
    }
    if complex_pattern().is_match(trimmed) || trimmed.chars().count() > 600 {
        return (Tier::Complex, 0.86);
    }

    (Tier::Medium, 0.5)
}
