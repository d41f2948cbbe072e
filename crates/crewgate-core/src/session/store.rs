//! Session persistence and caching.
//!
//! One session per room. File format: JSONL in `sessions/{safe_key}.jsonl`
//! - Line 1: `{"_type":"metadata","created_at":"...","updated_at":"...","metadata":{}}`
//! - Line 2+: one chat message per line
//!
//! Callers sanitize content before it gets here; the store never sees
//! concrete secrets.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::tokens::count_messages;
use crate::types::{ChatMessage, Session};
use crate::utils::safe_filename;

#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Room-keyed sessions with an in-memory cache and JSONL persistence.
///
/// The per-room broker guarantees a single writer per key, so the `RwLock`
/// only guards cross-room cache access.
pub struct SessionStore {
    sessions_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(sessions_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(SessionStore {
            sessions_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Cache → disk → fresh, in that order.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    pub fn add_message(&self, key: &str, message: ChatMessage) {
        let mut session = self.get_or_create(key);
        session.messages.push(message);
        self.commit(session);
    }

    /// Swap the full message list (compaction) and persist.
    pub fn replace_messages(&self, key: &str, messages: Vec<ChatMessage>) {
        let mut session = self.get_or_create(key);
        session.messages = messages;
        self.commit(session);
    }

    pub fn set_metadata(&self, key: &str, meta_key: &str, value: &str) {
        let mut session = self.get_or_create(key);
        session.metadata.insert(meta_key.to_string(), value.to_string());
        self.commit(session);
    }

    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<ChatMessage> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        if len <= max_messages {
            session.messages
        } else {
            session.messages[len - max_messages..].to_vec()
        }
    }

    /// Clear messages only — metadata and room state survive (`/new`).
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.messages.clear();
        self.commit(session);
    }

    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }
        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key = %key, error = %e, "failed to delete session file");
                return false;
            }
            true
        } else {
            false
        }
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return keys;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        keys
    }

    fn commit(&self, mut session: Session) {
        session.updated_at = Utc::now();
        session.token_estimate = count_messages(&session.messages);

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(session.key.clone(), session.clone());
        }
        if let Err(e) = self.save_to_disk(&session) {
            warn!(key = %session.key, error = %e, "failed to persist session");
        }
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.jsonl", safe_filename(key)))
    }

    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open session file");
                return None;
            }
        };

        let reader = std::io::BufReader::new(file);
        let mut session = Session::new(key);

        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }

            if let Ok(header) = serde_json::from_str::<SessionHeader>(&line) {
                if header.record_type == "metadata" {
                    session.created_at = header.created_at;
                    session.updated_at = header.updated_at;
                    session.metadata = header.metadata;
                    continue;
                }
            }

            if let Ok(msg) = serde_json::from_str::<ChatMessage>(&line) {
                session.messages.push(msg);
            }
        }

        session.token_estimate = count_messages(&session.messages);
        debug!(key = %key, messages = session.messages.len(), "loaded session");
        Some(session)
    }

    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let mut file = std::fs::File::create(&path)?;

        let header = SessionHeader {
            record_type: "metadata".to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        };
        writeln!(file, "{}", serde_json::to_string(&header)?)?;

        for msg in &session.messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }
}
