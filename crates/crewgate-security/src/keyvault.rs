//! Symbolic key references and execution-time resolution.
//!
//! The LLM, the session store, and the logs only ever see references of the
//! shape `{{key_name}}`. The concrete value lives in the keyring and is
//! resolved by `get_for_execution` at the moment a tool or provider call
//! actually needs it.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::keyring_store::KeyringStore;

/// `{{snake_case_name}}`, exactly one enclosing brace pair, no whitespace.
fn symbolic_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}$").expect("pattern compiles")
    })
}

/// Resolution failures callers can match on.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("empty key reference")]
    EmptyReference,
    #[error("key not found for reference: {0}")]
    NotFound(String),
    #[error("keyring error: {0}")]
    Keyring(String),
}

/// Provider name → canonical key name.
pub const PROVIDER_KEY_MAP: &[(&str, &str)] = &[
    ("openrouter", "openrouter_key"),
    ("anthropic", "anthropic_key"),
    ("openai", "openai_key"),
    ("deepseek", "deepseek_key"),
    ("groq", "groq_key"),
    ("gemini", "gemini_key"),
    ("moonshot", "moonshot_key"),
    ("vllm", "vllm_key"),
    ("brave", "brave_key"),
];

/// Resolver from symbolic references to concrete secrets.
///
/// Exclusively owns concrete values; callers get them for a single
/// execution scope and drop them after use.
pub struct KeyVault {
    keyring: Arc<dyn KeyringStore>,
}

impl KeyVault {
    pub fn new(keyring: Arc<dyn KeyringStore>) -> Self {
        Self { keyring }
    }

    /// Whether `value` has the symbolic reference shape.
    pub fn is_symbolic_ref(value: &str) -> bool {
        symbolic_ref_pattern().is_match(value.trim())
    }

    /// `{{name}}` → `name`.
    pub fn key_name_of(value: &str) -> Option<String> {
        symbolic_ref_pattern()
            .captures(value.trim())
            .map(|c| c[1].to_string())
    }

    /// Wrap a key name into its symbolic form.
    pub fn to_ref(name: &str) -> String {
        format!("{{{{{name}}}}}")
    }

    /// Resolve a symbolic reference — or a bare provider name — to the
    /// concrete secret.
    pub fn get_for_execution(&self, key_ref: &str) -> Result<String, VaultError> {
        let key_ref = key_ref.trim();
        if key_ref.is_empty() {
            return Err(VaultError::EmptyReference);
        }

        let key_name = match Self::key_name_of(key_ref) {
            Some(name) => name,
            None => provider_key_name(key_ref),
        };

        if let Some(secret) = self.keyring.get_key(&key_name) {
            return Ok(secret);
        }
        // Legacy entries may be stored under the bare provider name.
        if let Some(secret) = self.keyring.get_key(key_ref) {
            return Ok(secret);
        }
        Err(VaultError::NotFound(key_ref.to_string()))
    }

    /// Resolve when symbolic, pass through otherwise.
    pub fn resolve_if_symbolic(&self, value: &str) -> Result<String, VaultError> {
        if Self::is_symbolic_ref(value) {
            self.get_for_execution(value)
        } else {
            Ok(value.to_string())
        }
    }

    pub fn store_key(&self, key_name: &str, secret: &str) -> Result<(), VaultError> {
        self.keyring
            .store_key(key_name, secret)
            .map_err(|e| VaultError::Keyring(e.to_string()))?;
        info!(key = %key_name, "key added to vault");
        Ok(())
    }

    pub fn has_key(&self, key_ref: &str) -> bool {
        let key_name = match Self::key_name_of(key_ref) {
            Some(name) => name,
            None => provider_key_name(key_ref),
        };
        self.keyring.has_key(&key_name) || self.keyring.has_key(key_ref)
    }

    /// Symbolic references for every known provider key currently stored.
    /// Safe to show to the LLM.
    pub fn list_references(&self) -> Vec<String> {
        PROVIDER_KEY_MAP
            .iter()
            .filter(|(provider, key_name)| {
                self.keyring.has_key(key_name) || self.keyring.has_key(provider)
            })
            .map(|(_, key_name)| Self::to_ref(key_name))
            .collect()
    }
}

fn provider_key_name(provider: &str) -> String {
    PROVIDER_KEY_MAP
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, key)| key.to_string())
        .unwrap_or_else(|| format!("{provider}_key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring_store::InMemoryKeyring;

    fn vault() -> KeyVault {
        KeyVault::new(Arc::new(InMemoryKeyring::new()))
    }

    #[test]
    fn test_is_symbolic_ref() {
        assert!(KeyVault::is_symbolic_ref("{{openrouter_key}}"));
        assert!(KeyVault::is_symbolic_ref("  {{brave_key}}  "));
        assert!(KeyVault::is_symbolic_ref("{{_private}}"));
        assert!(!KeyVault::is_symbolic_ref("openrouter_key"));
        assert!(!KeyVault::is_symbolic_ref("{openrouter_key}"));
        assert!(!KeyVault::is_symbolic_ref("{{{openrouter_key}}}"));
        assert!(!KeyVault::is_symbolic_ref("{{bad name}}"));
        assert!(!KeyVault::is_symbolic_ref("{{9starts_with_digit}}"));
        assert!(!KeyVault::is_symbolic_ref(""));
    }

    #[test]
    fn test_ref_shape_law_for_valid_identifiers() {
        for name in ["a", "key_name", "Key9", "_x", "openrouter_key"] {
            assert!(KeyVault::is_symbolic_ref(&KeyVault::to_ref(name)), "{name}");
        }
    }

    #[test]
    fn test_key_name_extraction() {
        assert_eq!(
            KeyVault::key_name_of("{{openrouter_key}}").as_deref(),
            Some("openrouter_key")
        );
        assert_eq!(KeyVault::key_name_of("not a ref"), None);
    }

    #[test]
    fn test_get_for_execution_by_ref() {
        let v = vault();
        v.store_key("openrouter_key", "sk-or-concrete").unwrap();
        let secret = v.get_for_execution("{{openrouter_key}}").unwrap();
        assert_eq!(secret, "sk-or-concrete");
    }

    #[test]
    fn test_get_for_execution_by_provider_name() {
        let v = vault();
        v.store_key("brave_key", "brave-123").unwrap();
        assert_eq!(v.get_for_execution("brave").unwrap(), "brave-123");
    }

    #[test]
    fn test_get_for_execution_unknown_fails() {
        let v = vault();
        assert!(v.get_for_execution("{{missing_key}}").is_err());
        assert!(v.get_for_execution("").is_err());
    }

    #[test]
    fn test_resolve_if_symbolic_passthrough() {
        let v = vault();
        v.store_key("openai_key", "sk-abc").unwrap();
        assert_eq!(v.resolve_if_symbolic("{{openai_key}}").unwrap(), "sk-abc");
        assert_eq!(v.resolve_if_symbolic("plain value").unwrap(), "plain value");
    }

    #[test]
    fn test_has_key() {
        let v = vault();
        v.store_key("groq_key", "gsk_1").unwrap();
        assert!(v.has_key("{{groq_key}}"));
        assert!(v.has_key("groq"));
        assert!(!v.has_key("{{deepseek_key}}"));
    }

    #[test]
    fn test_list_references_only_stored() {
        let v = vault();
        v.store_key("openrouter_key", "1").unwrap();
        v.store_key("brave_key", "2").unwrap();
        let refs = v.list_references();
        assert!(refs.contains(&"{{openrouter_key}}".to_string()));
        assert!(refs.contains(&"{{brave_key}}".to_string()));
        assert!(!refs.contains(&"{{openai_key}}".to_string()));
    }
}
