//! The memory facade — the narrow long-term-memory surface the loop uses.
//!
//! Three operations: append an event, assemble a context block, record a
//! learning. The backing store is plain JSONL under `<workspace>/memory/`
//! (per-room event logs, a shared learnings log, a preferences file users
//! edit by hand). Everything here is best-effort: memory failures are
//! warnings, never fatal to message processing.
//!
//! Learnings buffer in memory and hit disk on `flush()` — the same hook the
//! session compactor fires before it drops messages, so volatile knowledge
//! moves to durable memory ahead of truncation. Flush and any background
//! extraction share one async lock to avoid racing each other.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crewgate_core::bus::Direction;
use crewgate_core::utils::safe_filename;

/// Buffered learnings auto-flush past this count.
const PENDING_FLUSH_WATERMARK: usize = 8;

/// Events read back for context assembly.
const CONTEXT_EVENT_WINDOW: usize = 12;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub channel: String,
    pub room_id: String,
    pub session_key: String,
    pub content: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Learning {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Where it came from, e.g. "feedback", "routine:coder".
    pub source: String,
    pub confidence: f64,
}

pub struct MemoryFacade {
    dir: PathBuf,
    /// Serializes flush against background extraction and the compactor's
    /// pre-compaction flush.
    background_lock: Arc<tokio::sync::Mutex<()>>,
    pending: Mutex<Vec<Learning>>,
    /// Token ceiling for assembled context blocks.
    context_token_budget: usize,
}

impl MemoryFacade {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let dir = workspace.into().join("memory");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create memory directory");
        }
        Self {
            dir,
            background_lock: Arc::new(tokio::sync::Mutex::new(())),
            pending: Mutex::new(Vec::new()),
            context_token_budget: 800,
        }
    }

    pub fn with_context_budget(mut self, tokens: usize) -> Self {
        self.context_token_budget = tokens;
        self
    }

    /// The lock shared with the compactor's memory-flush hook.
    pub fn background_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.background_lock.clone()
    }

    fn events_path(&self, room_id: &str) -> PathBuf {
        self.dir
            .join(format!("events-{}.jsonl", safe_filename(room_id)))
    }

    fn learnings_path(&self) -> PathBuf {
        self.dir.join("learnings.jsonl")
    }

    fn preferences_path(&self) -> PathBuf {
        self.dir.join("preferences.md")
    }

    /// Record one conversation event. Content must already be sanitized by
    /// the caller.
    pub fn append_event(
        &self,
        direction: Direction,
        channel: &str,
        content: &str,
        session_key: &str,
        room_id: &str,
    ) {
        let event = MemoryEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            direction,
            channel: channel.to_string(),
            room_id: room_id.to_string(),
            session_key: session_key.to_string(),
            content: content.to_string(),
        };
        if let Err(e) = append_jsonl(&self.events_path(room_id), &event) {
            warn!(room_id = %room_id, error = %e, "failed to append memory event");
        }
    }

    /// Build the context block injected into the system prompt: user
    /// preferences, recent room events, and query-relevant learnings,
    /// bounded by the token budget. `None` when there is nothing to say.
    pub fn assemble_context(
        &self,
        room_id: &str,
        query: Option<&str>,
        include_preferences: bool,
    ) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();

        if include_preferences {
            if let Ok(prefs) = std::fs::read_to_string(self.preferences_path()) {
                let prefs = prefs.trim();
                if !prefs.is_empty() {
                    sections.push(format!("## User preferences\n{prefs}"));
                }
            }
        }

        let events = read_jsonl_tail::<MemoryEvent>(&self.events_path(room_id), CONTEXT_EVENT_WINDOW);
        if !events.is_empty() {
            let mut lines = Vec::with_capacity(events.len());
            for event in &events {
                let arrow = match event.direction {
                    Direction::Inbound => "←",
                    Direction::Outbound => "→",
                };
                lines.push(format!(
                    "- {arrow} {}",
                    crewgate_core::utils::truncate_string(&event.content, 140)
                ));
            }
            sections.push(format!("## Recent activity\n{}", lines.join("\n")));
        }

        let learnings = self.relevant_learnings(query, 5);
        if !learnings.is_empty() {
            let lines: Vec<String> = learnings
                .iter()
                .map(|l| format!("- {}", l.content))
                .collect();
            sections.push(format!("## Learnings\n{}", lines.join("\n")));
        }

        if sections.is_empty() {
            return None;
        }

        let mut block = format!("# Memory Context\n\n{}", sections.join("\n\n"));
        let char_budget = self.context_token_budget * 4;
        if block.chars().count() > char_budget {
            block = block.chars().take(char_budget).collect();
        }
        Some(block)
    }

    /// Buffer a learning for the next flush.
    pub fn record_learning(&self, content: &str, source: &str, confidence: f64) {
        let learning = Learning {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            content: content.to_string(),
            source: source.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        };

        let over_watermark = {
            let mut pending = self.pending.lock().unwrap();
            pending.push(learning);
            pending.len() >= PENDING_FLUSH_WATERMARK
        };
        if over_watermark {
            self.flush_pending();
        }
    }

    /// Persist buffered learnings under the background lock. This is the
    /// pre-compaction memory-flush hook.
    pub async fn flush(&self) {
        let _guard = self.background_lock.lock().await;
        self.flush_pending();
    }

    fn flush_pending(&self) {
        let drained: Vec<Learning> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        let path = self.learnings_path();
        for learning in &drained {
            if let Err(e) = append_jsonl(&path, learning) {
                warn!(error = %e, "failed to persist learning");
            }
        }
        debug!(count = drained.len(), "flushed learnings to durable memory");
    }

    pub fn pending_learnings(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn relevant_learnings(&self, query: Option<&str>, limit: usize) -> Vec<Learning> {
        let all = read_jsonl_tail::<Learning>(&self.learnings_path(), 50);
        let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
            return all.into_iter().rev().take(limit).rev().collect();
        };

        let query_words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_string)
            .collect();
        if query_words.is_empty() {
            return all.into_iter().rev().take(limit).rev().collect();
        }

        let mut scored: Vec<(usize, Learning)> = all
            .into_iter()
            .map(|l| {
                let text = l.content.to_lowercase();
                let hits = query_words.iter().filter(|w| text.contains(*w)).count();
                (hits, l)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(limit).map(|(_, l)| l).collect()
    }
}

fn append_jsonl<T: Serialize>(path: &PathBuf, value: &T) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

fn read_jsonl_tail<T: for<'de> Deserialize<'de>>(path: &PathBuf, limit: usize) -> Vec<T> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut items: Vec<T> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}
