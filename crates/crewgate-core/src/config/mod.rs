//! Configuration schema and loader.

pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, resolve_keyring_markers, save_config, KEYRING_MARKER};
pub use schema::Config;
