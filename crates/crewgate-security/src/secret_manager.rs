//! Two-way secret conversion.
//!
//! Inbound: credentials a user pastes into chat become symbolic references
//! before the LLM sees the text; the concrete values go into the vault.
//! Outbound: references inside tool arguments resolve back to concrete
//! values only at execution time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use tracing::{debug, info};

use crate::keyvault::KeyVault;
use crate::sanitizer::Sanitizer;

/// Matches `{{name}}` anywhere inside a string.
fn inline_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").expect("pattern compiles"))
}

/// Detected secret types that map onto a provider key name. Everything else
/// gets a minted `user_secret_<n>` name.
fn provider_ref_name(secret_type: &str) -> Option<&'static str> {
    match secret_type {
        "openrouter" => Some("openrouter_key"),
        "anthropic" => Some("anthropic_key"),
        "openai" => Some("openai_key"),
        "groq" => Some("groq_key"),
        "deepseek" => Some("deepseek_key"),
        "github_token" => Some("github_token"),
        _ => None,
    }
}

/// Converts between concrete secrets and symbolic references.
pub struct SecretManager {
    vault: Arc<KeyVault>,
    sanitizer: Sanitizer,
    /// Concrete value → ref name, so a re-pasted secret reuses its name.
    seen: RwLock<HashMap<String, String>>,
    minted: AtomicUsize,
}

impl SecretManager {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            sanitizer: Sanitizer::new(),
            seen: RwLock::new(HashMap::new()),
            minted: AtomicUsize::new(0),
        }
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Replace detected credentials with symbolic references, storing the
    /// concrete values in the vault. Returns the converted text and how
    /// many secrets were captured.
    pub fn to_symbolic(&self, text: &str, session_key: &str) -> (String, usize) {
        let matches = self.sanitizer.detect(text);
        if matches.is_empty() {
            return (text.to_string(), 0);
        }

        let mut result = text.to_string();
        let mut converted = 0;
        for m in matches.iter().rev() {
            let secret = &text[m.start..m.end];
            let ref_name = self.ref_name_for(m.secret_type, secret);
            if self.vault.store_key(&ref_name, secret).is_err() {
                // Vault write failed; leave the sanitizer to mask it later
                // rather than echoing the raw value back.
                continue;
            }
            result.replace_range(m.start..m.end, &KeyVault::to_ref(&ref_name));
            converted += 1;
        }

        if converted > 0 {
            info!(
                session_key = %session_key,
                count = converted,
                "converted user secrets to symbolic references"
            );
        }
        (result, converted)
    }

    /// Replace every resolvable `{{ref}}` with its concrete value. Unknown
    /// references are left as-is. Only tool-execution paths call this.
    pub fn from_symbolic(&self, text: &str) -> String {
        inline_ref_pattern()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let whole = caps[0].to_string();
                match self.vault.get_for_execution(&whole) {
                    Ok(secret) => secret,
                    Err(_) => {
                        debug!(reference = %whole, "unresolvable symbolic reference left in place");
                        whole
                    }
                }
            })
            .into_owned()
    }

    /// Whether any symbolic reference appears in the text.
    pub fn contains_refs(text: &str) -> bool {
        inline_ref_pattern().is_match(text)
    }

    fn ref_name_for(&self, secret_type: &str, secret: &str) -> String {
        if let Some(name) = self.seen.read().unwrap().get(secret) {
            return name.clone();
        }

        let name = match provider_ref_name(secret_type) {
            Some(provider_name) => provider_name.to_string(),
            None => {
                let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
                format!("user_secret_{n}")
            }
        };
        self.seen
            .write()
            .unwrap()
            .insert(secret.to_string(), name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring_store::InMemoryKeyring;

    const OPENROUTER_KEY: &str =
        "sk-or-v1-abcdefghijklmnop1234567890abcdefghijklmnop1234";

    fn manager() -> SecretManager {
        let vault = Arc::new(KeyVault::new(Arc::new(InMemoryKeyring::new())));
        SecretManager::new(vault)
    }

    #[test]
    fn test_provider_secret_gets_provider_ref() {
        let mgr = manager();
        let text = format!("Use my key {OPENROUTER_KEY} to summarize X.");
        let (converted, count) = mgr.to_symbolic(&text, "general");

        assert_eq!(count, 1);
        assert!(!converted.contains(OPENROUTER_KEY));
        assert!(converted.contains("{{openrouter_key}}"));
        assert_eq!(
            mgr.vault().get_for_execution("{{openrouter_key}}").unwrap(),
            OPENROUTER_KEY
        );
    }

    #[test]
    fn test_generic_secret_gets_minted_ref() {
        let mgr = manager();
        let (converted, count) = mgr.to_symbolic("password = correcthorsebattery", "general");
        assert_eq!(count, 1);
        assert!(converted.contains("{{user_secret_1}}"));
        assert_eq!(
            mgr.vault().get_for_execution("{{user_secret_1}}").unwrap(),
            "correcthorsebattery"
        );
    }

    #[test]
    fn test_repeated_secret_reuses_name() {
        let mgr = manager();
        let (_, c1) = mgr.to_symbolic("pwd = topsecretvalue99", "general");
        let (second, c2) = mgr.to_symbolic("again pwd = topsecretvalue99", "general");
        assert_eq!((c1, c2), (1, 1));
        assert!(second.contains("{{user_secret_1}}"));
        assert!(!second.contains("user_secret_2"));
    }

    #[test]
    fn test_clean_text_unchanged() {
        let mgr = manager();
        let (out, count) = mgr.to_symbolic("nothing secret here", "general");
        assert_eq!(out, "nothing secret here");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_from_symbolic_resolves_known_refs() {
        let mgr = manager();
        mgr.vault().store_key("brave_key", "brave-xyz").unwrap();
        let out = mgr.from_symbolic(r#"{"api_key": "{{brave_key}}", "q": "rust"}"#);
        assert!(out.contains("brave-xyz"));
        assert!(!out.contains("{{brave_key}}"));
    }

    #[test]
    fn test_from_symbolic_leaves_unknown_refs() {
        let mgr = manager();
        let text = "call with {{never_stored}} token";
        assert_eq!(mgr.from_symbolic(text), text);
    }

    #[test]
    fn test_round_trip_identity_without_new_credentials() {
        let mgr = manager();
        let original = format!("summarize with {OPENROUTER_KEY}");
        let (symbolic, _) = mgr.to_symbolic(&original, "general");

        // from_symbolic then to_symbolic lands back on the same symbolic text.
        let concrete = mgr.from_symbolic(&symbolic);
        assert_eq!(concrete, original);
        let (symbolic_again, _) = mgr.to_symbolic(&concrete, "general");
        assert_eq!(symbolic_again, symbolic);
    }

    #[test]
    fn test_contains_refs() {
        assert!(SecretManager::contains_refs("use {{openrouter_key}} here"));
        assert!(!SecretManager::contains_refs("no refs"));
    }
}
