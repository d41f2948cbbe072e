//! Append-only audit log using symbolic references only.
//!
//! One JSON object per line. Entries are safe to share and analyze: a
//! concrete secret never appears here — `key_ref` is always symbolic, and
//! free-text fields go through the sanitizer before writing.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::anomaly::AnomalyDetector;
use crate::sanitizer::Sanitizer;

/// A single audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339 UTC with a `Z` suffix.
    pub timestamp: String,
    /// e.g. `tool.web_search`, `api.openrouter`, `key.store`.
    pub operation: String,
    /// Symbolic reference like `{{brave_key}}`, or empty when no key was
    /// involved.
    pub key_ref: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Appends audit entries to a JSONL file. Write failures are warnings —
/// auditing never takes down message processing.
///
/// With a detector attached, every keyed entry feeds the usage counters
/// and any tripped check is written back as a `security.anomaly` entry.
pub struct AuditLog {
    path: PathBuf,
    sanitizer: Sanitizer,
    write_lock: Mutex<()>,
    detector: Option<Arc<AnomalyDetector>>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            path,
            sanitizer: Sanitizer::new(),
            write_lock: Mutex::new(()),
            detector: None,
        }
    }

    pub fn with_anomaly_detector(mut self, detector: Arc<AnomalyDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Write one entry. Free-text fields are sanitized first; keyed
    /// entries also run through the anomaly checks.
    pub fn log(&self, mut entry: AuditEntry) {
        entry.key_ref = self.sanitizer.sanitize(&entry.key_ref);
        if let Some(error) = entry.error.take() {
            entry.error = Some(self.sanitizer.mask_for_log(&error));
        }

        if let Some(detector) = &self.detector {
            if !entry.key_ref.is_empty() {
                detector.record_request(&entry.key_ref);
                if !entry.success {
                    detector.record_error(&entry.key_ref);
                }
                for anomaly in detector.check_all(&entry.key_ref) {
                    warn!(
                        key_ref = %anomaly.key_ref,
                        severity = anomaly.severity.as_str(),
                        "{}", anomaly.description
                    );
                    self.write_entry(&AuditEntry {
                        timestamp: now_utc(),
                        operation: format!("security.anomaly.{}", anomaly.severity.as_str()),
                        key_ref: anomaly.key_ref.clone(),
                        success: false,
                        duration_ms: 0,
                        room_id: entry.room_id.clone(),
                        error: Some(anomaly.description.clone()),
                        details: anomaly.details.clone(),
                    });
                }
            }
        }

        self.write_entry(&entry);
    }

    /// Record a response size observation for a keyed operation.
    pub fn observe_response_size(&self, key_ref: &str, bytes: usize) {
        if let Some(detector) = &self.detector {
            if !key_ref.is_empty() {
                detector.record_response_size(key_ref, bytes as f64 / (1024.0 * 1024.0));
            }
        }
    }

    fn write_entry(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        let _guard = self.write_lock.lock().unwrap();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(error = %e, "failed to write audit log");
        }
    }

    /// Record a tool execution.
    pub fn log_tool(
        &self,
        tool_name: &str,
        key_ref: &str,
        success: bool,
        duration_ms: u64,
        room_id: Option<&str>,
        error: Option<&str>,
    ) {
        self.log(AuditEntry {
            timestamp: now_utc(),
            operation: format!("tool.{tool_name}"),
            key_ref: key_ref.to_string(),
            success,
            duration_ms,
            room_id: room_id.map(str::to_string),
            error: error.map(str::to_string),
            details: None,
        });
    }

    /// Record a provider API call.
    pub fn log_api_call(
        &self,
        provider: &str,
        key_ref: &str,
        success: bool,
        duration_ms: u64,
        details: Option<serde_json::Value>,
    ) {
        self.log(AuditEntry {
            timestamp: now_utc(),
            operation: format!("api.{provider}"),
            key_ref: key_ref.to_string(),
            success,
            duration_ms,
            room_id: None,
            error: None,
            details,
        });
    }

    /// Record a key lifecycle operation (store/delete).
    pub fn log_key_operation(&self, operation: &str, key_ref: &str, success: bool) {
        self.log(AuditEntry {
            timestamp: now_utc(),
            operation: format!("key.{operation}"),
            key_ref: key_ref.to_string(),
            success,
            duration_ms: 0,
            room_id: None,
            error: None,
            details: None,
        });
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let reader = std::io::BufReader::new(file);
        let mut entries: Vec<AuditEntry> = reader
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        entries
    }
}

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
