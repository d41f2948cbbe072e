//! Security commands — key storage and the audit log.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crewgate_core::config::{get_config_path, load_config, save_config, KEYRING_MARKER};
use crewgate_core::utils::{expand_home, get_data_path};
use crewgate_security::{AuditLog, InMemoryKeyring, KeyVault, KeyringStore, OsKeyring, Sanitizer};

#[derive(Subcommand)]
pub enum SecurityCommands {
    /// Store a key in the OS keyring (reads the value from stdin)
    StoreKey {
        /// Key name, e.g. `openrouter_key` or `brave_key`
        name: String,
        /// Also set the provider's config field to the keyring marker
        #[arg(long, default_value_t = false)]
        link_config: bool,
    },

    /// List available symbolic references
    ListRefs,

    /// Show the tail of the audit log
    Audit {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn dispatch(action: SecurityCommands) -> Result<()> {
    let config = load_config(None);
    let keyring: Arc<dyn KeyringStore> = {
        let os = OsKeyring::new(&config.security.keyring_service);
        if os.is_available() {
            Arc::new(os)
        } else {
            eprintln!("{}", "OS keyring unavailable; falling back to a process-local store".yellow());
            Arc::new(InMemoryKeyring::new())
        }
    };
    let vault = KeyVault::new(keyring);

    match action {
        SecurityCommands::StoreKey { name, link_config } => {
            print!("value for {name}: ");
            std::io::stdout().flush()?;
            let mut value = String::new();
            std::io::stdin().lock().read_line(&mut value)?;
            let value = value.trim();
            anyhow::ensure!(!value.is_empty(), "empty value");

            vault.store_key(&name, value)?;
            println!("stored; reference it as {}", KeyVault::to_ref(&name).green());

            if link_config {
                let provider = name.strip_suffix("_key").unwrap_or(&name);
                let mut config = load_config(None);
                match config.providers.get_by_name_mut(provider) {
                    Some(entry) => {
                        entry.api_key = KEYRING_MARKER.to_string();
                        save_config(&config, None)?;
                        println!("config at {} now loads this key from the keyring", get_config_path().display());
                    }
                    None => println!("no provider section named '{provider}'; config unchanged"),
                }
            }
        }
        SecurityCommands::ListRefs => {
            let refs = vault.list_references();
            if refs.is_empty() {
                println!("no keys stored");
            }
            for reference in refs {
                println!("{reference}");
            }
        }
        SecurityCommands::Audit { limit } => {
            let path = if config.security.audit_log_path.is_empty() {
                get_data_path().join("audit.log")
            } else {
                expand_home(&config.security.audit_log_path)
            };
            let log = AuditLog::new(path);
            let sanitizer = Sanitizer::new();
            for entry in log.recent(limit) {
                let mark = if entry.success { "✓".green() } else { "✗".red() };
                println!(
                    "{} {mark} {} {} {}ms {}",
                    entry.timestamp,
                    entry.operation,
                    sanitizer.sanitize(&entry.key_ref),
                    entry.duration_ms,
                    entry.room_id.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}
