//! Config loader — reads `~/.crewgate/config.json`, merges env vars, fixes
//! file permissions, and resolves keyring markers.
//!
//! # Loading precedence
//! 1. Defaults (`Config::default()`)
//! 2. JSON file at `~/.crewgate/config.json`
//! 3. Environment variables `CREWGATE_<SECTION>__<FIELD>` (override JSON)
//!
//! The config file holds credentials, so it must be private: on load, file
//! permissions looser than 0600 (or 0700 on the parent) are tightened.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ProvidersConfig};

/// An api_key field holding this marker means "load from the OS keyring at
/// boot". The in-memory config never retains it.
pub const KEYRING_MARKER: &str = "__KEYRING__";

pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the given path (default path when `None`).
///
/// Falls back to `Config::default()` when the file is absent or unreadable.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "no config file, using defaults");
        return apply_env_overrides(Config::default());
    }

    enforce_permissions(&config_path);

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %config_path.display(), error = %e, "failed to read config");
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to parse config JSON, using defaults");
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration as pretty-printed camelCase JSON with 0600 perms.
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(&config_path, json)?;
    enforce_permissions(&config_path);
    debug!(path = %config_path.display(), "config saved");
    Ok(())
}

/// Replace `__KEYRING__` api_key markers with values from the resolver.
///
/// The resolver receives the key name (`<provider>_key`). Unresolvable
/// markers become empty strings — the provider reads as unconfigured rather
/// than leaking the marker into requests.
pub fn resolve_keyring_markers(
    config: &mut Config,
    resolver: impl Fn(&str) -> Option<String>,
) -> usize {
    let mut resolved = 0;
    for name in ProvidersConfig::NAMES {
        let Some(provider) = config.providers.get_by_name_mut(name) else {
            continue;
        };
        if provider.api_key == KEYRING_MARKER {
            match resolver(&format!("{name}_key")) {
                Some(secret) => {
                    provider.api_key = secret;
                    resolved += 1;
                    debug!(provider = %name, "resolved keyring marker");
                }
                None => {
                    warn!(provider = %name, "keyring marker set but no key stored");
                    provider.api_key = String::new();
                }
            }
        }
    }
    resolved
}

/// Tighten config-file permissions: 0600 on the file, 0700 on its parent.
#[cfg(unix)]
fn enforce_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(path = %path.display(), mode = format!("{mode:o}"), "tightening config permissions to 0600");
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
    }
    if let Some(parent) = path.parent() {
        if let Ok(meta) = std::fs::metadata(parent) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
            }
        }
    }
}

#[cfg(not(unix))]
fn enforce_permissions(_path: &Path) {}

/// Env var format: `CREWGATE_<SECTION>__<FIELD>`.
///
/// Supported overrides:
/// - `CREWGATE_AGENTS__MODEL`
/// - `CREWGATE_AGENTS__WORKSPACE`
/// - `CREWGATE_PROVIDERS__<NAME>__API_KEY`
/// - `CREWGATE_PROVIDERS__<NAME>__API_BASE`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(model) = std::env::var("CREWGATE_AGENTS__MODEL") {
        config.agents.defaults.model = model;
    }
    if let Ok(workspace) = std::env::var("CREWGATE_AGENTS__WORKSPACE") {
        config.agents.defaults.workspace = workspace;
    }

    for name in ProvidersConfig::NAMES {
        let upper = name.to_uppercase();
        if let Ok(key) = std::env::var(format!("CREWGATE_PROVIDERS__{upper}__API_KEY")) {
            if let Some(provider) = config.providers.get_by_name_mut(name) {
                provider.api_key = key;
            }
        }
        if let Ok(base) = std::env::var(format!("CREWGATE_PROVIDERS__{upper}__API_BASE")) {
            if let Some(provider) = config.providers.get_by_name_mut(name) {
                provider.api_base = Some(base);
            }
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.json")));
        assert_eq!(config.agents.defaults.max_tool_iterations, 20);
    }

    #[test]
    fn test_load_and_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.providers.openrouter.api_key = "sk-or-abc".into();
        save_config(&config, Some(&path)).unwrap();

        let loaded = load_config(Some(&path));
        assert_eq!(loaded.providers.openrouter.api_key, "sk-or-abc");
    }

    #[test]
    fn test_load_garbage_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = load_config(Some(&path));
        assert!(!config.providers.any_configured());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_tightened_on_load() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config(&Config::default(), Some(&path)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let _ = load_config(Some(&path));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config(&Config::default(), Some(&path)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_keyring_marker_resolved() {
        let mut config = Config::default();
        config.providers.anthropic.api_key = KEYRING_MARKER.into();
        config.providers.openai.api_key = "sk-plain".into();

        let resolved = resolve_keyring_markers(&mut config, |name| {
            (name == "anthropic_key").then(|| "sk-ant-from-keyring".to_string())
        });

        assert_eq!(resolved, 1);
        assert_eq!(config.providers.anthropic.api_key, "sk-ant-from-keyring");
        assert_eq!(config.providers.openai.api_key, "sk-plain");
    }

    #[test]
    fn test_keyring_marker_unresolvable_clears_key() {
        let mut config = Config::default();
        config.providers.groq.api_key = KEYRING_MARKER.into();
        resolve_keyring_markers(&mut config, |_| None);
        assert!(config.providers.groq.api_key.is_empty());
        assert!(!config.providers.groq.is_configured());
    }
}
