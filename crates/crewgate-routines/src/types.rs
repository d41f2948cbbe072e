//! Routine configuration and scheduler job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bot's routine configuration: named checks run on a fixed cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutineConfig {
    pub interval_s: u64,
    pub enabled: bool,
    /// Named self-initiated checks, run in order on each tick.
    pub checks: Vec<String>,
    /// Tick history entries kept per bot.
    pub retain_history_count: usize,
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            interval_s: 30 * 60,
            enabled: false,
            checks: Vec::new(),
            retain_history_count: 50,
        }
    }
}

/// A persisted scheduler job. Routine jobs are always `kind = "every"` with
/// a bot tag; disabling a routine flips `enabled` rather than deleting the
/// record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutineJob {
    pub id: String,
    pub bot: String,
    /// Always "every" for routines.
    pub kind: String,
    pub interval_s: u64,
    pub enabled: bool,
    pub checks: Vec<String>,
    pub retain_history_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

impl RoutineJob {
    pub fn new(bot: impl Into<String>, config: &RoutineConfig) -> Self {
        let bot = bot.into();
        Self {
            id: format!("routine-{bot}"),
            bot,
            kind: "every".to_string(),
            interval_s: config.interval_s,
            enabled: config.enabled,
            checks: config.checks.clone(),
            retain_history_count: config.retain_history_count,
            last_run: None,
            next_run: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.next_run {
            Some(next) => now >= next,
            None => true,
        }
    }

    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.next_run = Some(now + chrono::Duration::seconds(self.interval_s as i64));
    }
}

/// One executed check within a tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// History record for one routine tick of one bot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickRecord {
    pub bot: String,
    pub timestamp: DateTime<Utc>,
    /// "schedule" or the reason passed to `trigger_now`.
    pub trigger: String,
    pub outcomes: Vec<CheckOutcome>,
}

impl TickRecord {
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let ok = self.outcomes.iter().filter(|o| o.success).count();
        ok as f64 / self.outcomes.len() as f64
    }
}
