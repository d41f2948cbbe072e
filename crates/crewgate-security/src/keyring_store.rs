//! Keyring backends.
//!
//! `OsKeyring` stores secrets in the platform keychain via the `keyring`
//! crate. `InMemoryKeyring` backs tests and headless environments where no
//! secret service is available.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

/// Storage backend for the KeyVault.
pub trait KeyringStore: Send + Sync {
    fn store_key(&self, name: &str, secret: &str) -> anyhow::Result<()>;
    fn get_key(&self, name: &str) -> Option<String>;
    fn delete_key(&self, name: &str) -> anyhow::Result<bool>;
    fn has_key(&self, name: &str) -> bool {
        self.get_key(name).is_some()
    }
}

// ─────────────────────────────────────────────
// OS keyring
// ─────────────────────────────────────────────

/// Platform keychain, one entry per key name under a fixed service.
pub struct OsKeyring {
    service: String,
}

impl OsKeyring {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> anyhow::Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, name)?)
    }

    /// Whether the platform secret service actually works, probed with a
    /// disposable entry.
    pub fn is_available(&self) -> bool {
        let Ok(entry) = self.entry("__probe__") else {
            return false;
        };
        if entry.set_password("probe").is_err() {
            return false;
        }
        let ok = matches!(entry.get_password().as_deref(), Ok("probe"));
        let _ = entry.delete_credential();
        ok
    }
}

impl KeyringStore for OsKeyring {
    fn store_key(&self, name: &str, secret: &str) -> anyhow::Result<()> {
        self.entry(name)?.set_password(secret)?;
        debug!(key = %name, "stored key in OS keyring");
        Ok(())
    }

    fn get_key(&self, name: &str) -> Option<String> {
        match self.entry(name) {
            Ok(entry) => match entry.get_password() {
                Ok(secret) => Some(secret),
                Err(keyring::Error::NoEntry) => None,
                Err(e) => {
                    warn!(key = %name, error = %e, "keyring read failed");
                    None
                }
            },
            Err(e) => {
                warn!(key = %name, error = %e, "keyring entry failed");
                None
            }
        }
    }

    fn delete_key(&self, name: &str) -> anyhow::Result<bool> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────
// In-memory keyring
// ─────────────────────────────────────────────

/// Process-local store for tests and environments without a secret service.
#[derive(Default)]
pub struct InMemoryKeyring {
    keys: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn key_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl KeyringStore for InMemoryKeyring {
    fn store_key(&self, name: &str, secret: &str) -> anyhow::Result<()> {
        self.keys
            .write()
            .unwrap()
            .insert(name.to_string(), secret.to_string());
        Ok(())
    }

    fn get_key(&self, name: &str) -> Option<String> {
        self.keys.read().unwrap().get(name).cloned()
    }

    fn delete_key(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.keys.write().unwrap().remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let store = InMemoryKeyring::new();
        assert!(store.is_empty());
        store.store_key("openrouter_key", "sk-or-123").unwrap();
        assert_eq!(store.get_key("openrouter_key").as_deref(), Some("sk-or-123"));
        assert!(store.has_key("openrouter_key"));
        assert!(!store.has_key("missing"));
    }

    #[test]
    fn test_in_memory_delete() {
        let store = InMemoryKeyring::new();
        store.store_key("k", "v").unwrap();
        assert!(store.delete_key("k").unwrap());
        assert!(!store.delete_key("k").unwrap());
        assert!(store.get_key("k").is_none());
    }

    #[test]
    fn test_in_memory_overwrite() {
        let store = InMemoryKeyring::new();
        store.store_key("k", "old").unwrap();
        store.store_key("k", "new").unwrap();
        assert_eq!(store.get_key("k").as_deref(), Some("new"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_key_names_sorted() {
        let store = InMemoryKeyring::new();
        store.store_key("b_key", "2").unwrap();
        store.store_key("a_key", "1").unwrap();
        assert_eq!(store.key_names(), vec!["a_key".to_string(), "b_key".to_string()]);
    }
}
