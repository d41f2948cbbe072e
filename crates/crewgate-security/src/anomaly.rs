//! Anomaly detection for suspicious key activity.
//!
//! Watches usage patterns per symbolic key reference: unusual request
//! rates, sustained errors, and oversized responses. The audit log feeds
//! it on every entry and writes detected anomalies back as their own
//! `security.anomaly` records, so alerts land in the same JSONL stream
//! operators already tail.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A detected security anomaly. Carries the symbolic reference only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anomaly {
    pub severity: Severity,
    pub description: String,
    pub key_ref: String,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Default)]
struct KeyStats {
    request_times: Vec<DateTime<Utc>>,
    error_count: u32,
    response_sizes_mb: Vec<f64>,
}

/// Detects suspicious patterns in key usage.
///
/// Thread-safe; one instance is shared behind the audit log.
pub struct AnomalyDetector {
    stats: Mutex<HashMap<String, KeyStats>>,
    pub max_requests_per_minute: usize,
    pub max_requests_per_hour: usize,
    pub max_errors_per_window: u32,
    pub max_response_size_mb: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            max_requests_per_minute: 60,
            max_requests_per_hour: 1000,
            max_errors_per_window: 5,
            max_response_size_mb: 10.0,
        }
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request against a key. Entries older than an hour are
    /// dropped so the window never grows unbounded.
    pub fn record_request(&self, key_ref: &str) {
        let now = Utc::now();
        let cutoff = now - Duration::hours(1);
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(key_ref.to_string()).or_default();
        entry.request_times.push(now);
        entry.request_times.retain(|t| *t > cutoff);
    }

    pub fn record_error(&self, key_ref: &str) {
        let mut stats = self.stats.lock().unwrap();
        stats.entry(key_ref.to_string()).or_default().error_count += 1;
    }

    pub fn record_response_size(&self, key_ref: &str, size_mb: f64) {
        let mut stats = self.stats.lock().unwrap();
        stats
            .entry(key_ref.to_string())
            .or_default()
            .response_sizes_mb
            .push(size_mb);
    }

    /// Per-minute and per-hour request-rate checks (potential
    /// exfiltration).
    pub fn check_request_rate(&self, key_ref: &str) -> Option<Anomaly> {
        let now = Utc::now();
        let one_minute_ago = now - Duration::minutes(1);
        let one_hour_ago = now - Duration::hours(1);

        let stats = self.stats.lock().unwrap();
        let requests = &stats.get(key_ref)?.request_times;

        let last_minute = requests.iter().filter(|t| **t > one_minute_ago).count();
        if last_minute > self.max_requests_per_minute {
            return Some(Anomaly {
                severity: Severity::High,
                description: format!(
                    "Request rate exceeded: {last_minute} requests/min (limit: {})",
                    self.max_requests_per_minute
                ),
                key_ref: key_ref.to_string(),
                detected_at: now,
                details: Some(serde_json::json!({
                    "requests_per_minute": last_minute,
                    "limit": self.max_requests_per_minute,
                })),
            });
        }

        let last_hour = requests.iter().filter(|t| **t > one_hour_ago).count();
        if last_hour > self.max_requests_per_hour {
            return Some(Anomaly {
                severity: Severity::Medium,
                description: format!(
                    "Hourly request limit exceeded: {last_hour}/{}",
                    self.max_requests_per_hour
                ),
                key_ref: key_ref.to_string(),
                detected_at: now,
                details: Some(serde_json::json!({
                    "requests_per_hour": last_hour,
                    "limit": self.max_requests_per_hour,
                })),
            });
        }

        None
    }

    /// Sustained errors suggest abuse or a broken credential.
    pub fn check_error_rate(&self, key_ref: &str) -> Option<Anomaly> {
        let stats = self.stats.lock().unwrap();
        let error_count = stats.get(key_ref)?.error_count;
        if error_count > self.max_errors_per_window {
            return Some(Anomaly {
                severity: Severity::Medium,
                description: format!("High error rate: {error_count} errors detected"),
                key_ref: key_ref.to_string(),
                detected_at: Utc::now(),
                details: Some(serde_json::json!({
                    "error_count": error_count,
                    "limit": self.max_errors_per_window,
                })),
            });
        }
        None
    }

    /// Oversized responses can indicate data theft.
    pub fn check_response_size(&self, key_ref: &str) -> Option<Anomaly> {
        let stats = self.stats.lock().unwrap();
        let sizes = &stats.get(key_ref)?.response_sizes_mb;
        if sizes.is_empty() {
            return None;
        }
        let avg = sizes.iter().sum::<f64>() / sizes.len() as f64;
        if avg > self.max_response_size_mb {
            return Some(Anomaly {
                severity: Severity::High,
                description: format!(
                    "Large response sizes detected: avg {avg:.1}MB (limit: {}MB)",
                    self.max_response_size_mb
                ),
                key_ref: key_ref.to_string(),
                detected_at: Utc::now(),
                details: Some(serde_json::json!({
                    "average_size_mb": avg,
                    "limit_mb": self.max_response_size_mb,
                    "sample_count": sizes.len(),
                })),
            });
        }
        None
    }

    /// Run every check for a key.
    pub fn check_all(&self, key_ref: &str) -> Vec<Anomaly> {
        [
            self.check_request_rate(key_ref),
            self.check_error_rate(key_ref),
            self.check_response_size(key_ref),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Reset counters for one key, or everything.
    pub fn reset(&self, key_ref: Option<&str>) {
        let mut stats = self.stats.lock().unwrap();
        match key_ref {
            Some(key) => {
                stats.remove(key);
            }
            None => stats.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector {
            max_requests_per_minute: 5,
            max_errors_per_window: 2,
            max_response_size_mb: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_quiet_key_has_no_anomalies() {
        let d = detector();
        d.record_request("{{brave_key}}");
        assert!(d.check_all("{{brave_key}}").is_empty());
        assert!(d.check_all("{{never_seen}}").is_empty());
    }

    #[test]
    fn test_request_rate_trips() {
        let d = detector();
        for _ in 0..6 {
            d.record_request("{{openrouter_key}}");
        }
        let anomaly = d.check_request_rate("{{openrouter_key}}").unwrap();
        assert_eq!(anomaly.severity, Severity::High);
        assert!(anomaly.description.contains("requests/min"));
        assert_eq!(anomaly.key_ref, "{{openrouter_key}}");
        // Other keys are unaffected.
        d.record_request("{{brave_key}}");
        assert!(d.check_request_rate("{{brave_key}}").is_none());
    }

    #[test]
    fn test_error_rate_trips() {
        let d = detector();
        for _ in 0..3 {
            d.record_error("{{brave_key}}");
        }
        let anomaly = d.check_error_rate("{{brave_key}}").unwrap();
        assert_eq!(anomaly.severity, Severity::Medium);
        assert!(anomaly.description.contains("3 errors"));
    }

    #[test]
    fn test_response_size_trips_on_average() {
        let d = detector();
        d.record_response_size("{{brave_key}}", 0.2);
        assert!(d.check_response_size("{{brave_key}}").is_none());
        d.record_response_size("{{brave_key}}", 4.0);
        let anomaly = d.check_response_size("{{brave_key}}").unwrap();
        assert_eq!(anomaly.severity, Severity::High);
        assert!(anomaly.details.unwrap()["sample_count"].as_u64().unwrap() == 2);
    }

    #[test]
    fn test_check_all_collects_everything() {
        let d = detector();
        for _ in 0..6 {
            d.record_request("{{k}}");
        }
        for _ in 0..3 {
            d.record_error("{{k}}");
        }
        d.record_response_size("{{k}}", 5.0);
        let anomalies = d.check_all("{{k}}");
        assert_eq!(anomalies.len(), 3);
    }

    #[test]
    fn test_reset() {
        let d = detector();
        for _ in 0..6 {
            d.record_request("{{a}}");
            d.record_request("{{b}}");
        }
        d.reset(Some("{{a}}"));
        assert!(d.check_request_rate("{{a}}").is_none());
        assert!(d.check_request_rate("{{b}}").is_some());
        d.reset(None);
        assert!(d.check_request_rate("{{b}}").is_none());
    }

    #[test]
    fn test_anomaly_serializes_with_severity() {
        let d = detector();
        for _ in 0..6 {
            d.record_request("{{k}}");
        }
        let anomaly = d.check_request_rate("{{k}}").unwrap();
        let json = serde_json::to_value(&anomaly).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["key_ref"], "{{k}}");
    }
}
