//! The secret pipeline.
//!
//! Credentials cross three zones: the LLM only ever sees symbolic
//! references (`{{openrouter_key}}`), tool execution resolves them to
//! concrete values for the duration of one call, and storage lives in the
//! OS keyring. The sanitizer is the defense-in-depth layer for anything
//! that slips past, and the audit log records operations using symbolic
//! references only.

pub mod anomaly;
pub mod audit;
pub mod keyring_store;
pub mod keyvault;
pub mod sanitizer;
pub mod secret_manager;
pub mod secure;

pub use anomaly::{Anomaly, AnomalyDetector, Severity};
pub use audit::{AuditEntry, AuditLog};
pub use keyring_store::{InMemoryKeyring, KeyringStore, OsKeyring};
pub use keyvault::{KeyVault, VaultError};
pub use sanitizer::{Sanitizer, SecretMatch};
pub use secret_manager::SecretManager;
pub use secure::SecureString;
