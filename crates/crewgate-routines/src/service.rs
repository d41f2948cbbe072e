//! The routine service — wakes each bot at its cadence.
//!
//! Job records persist as JSON so schedules survive restarts; disabling a
//! routine marks the job disabled rather than deleting it. Ticks run
//! serially within a bot and concurrently across bots. Each tick runs the
//! bot's named checks through a caller-supplied runner (which owns the
//! bot-filtered tool registry) and appends the outcome to the bot's private
//! tick history; a tick under 50% success also appends a mistake record.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::types::{CheckOutcome, RoutineConfig, RoutineJob, TickRecord};
use crewgate_core::utils::safe_filename;

/// Scheduler poll cadence.
const POLL_INTERVAL_S: u64 = 5;

/// Success-rate floor under which a tick records a mistake.
const MISTAKE_THRESHOLD: f64 = 0.5;

/// Runs one named check for one bot, returning detail text.
///
/// The runner executes through that bot's filtered tool registry; the
/// service only schedules and records.
pub type RoutineRunner = Arc<
    dyn Fn(String, String) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

pub struct RoutineService {
    data_dir: PathBuf,
    runner: RoutineRunner,
    jobs: Mutex<HashMap<String, RoutineJob>>,
    /// Per-bot tick serialization.
    bot_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    shutdown: Notify,
}

impl RoutineService {
    pub fn new(data_dir: PathBuf, runner: RoutineRunner) -> anyhow::Result<Self> {
        let routines_dir = data_dir.join("routines");
        std::fs::create_dir_all(&routines_dir)?;

        let service = Self {
            data_dir: routines_dir,
            runner,
            jobs: Mutex::new(HashMap::new()),
            bot_locks: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
        };
        service.load_jobs();
        Ok(service)
    }

    fn jobs_path(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    fn history_path(&self, bot: &str) -> PathBuf {
        self.data_dir.join(format!("ticks-{}.jsonl", safe_filename(bot)))
    }

    fn mistakes_path(&self, bot: &str) -> PathBuf {
        self.data_dir
            .join(format!("mistakes-{}.jsonl", safe_filename(bot)))
    }

    fn load_jobs(&self) {
        let path = self.jobs_path();
        if !path.exists() {
            return;
        }
        match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<Vec<RoutineJob>>(&s).map_err(Into::into))
        {
            Ok(loaded) => {
                // Construction-time only; the mutex is uncontended.
                if let Ok(mut jobs) = self.jobs.try_lock() {
                    for job in loaded {
                        jobs.insert(job.bot.clone(), job);
                    }
                    debug!(count = jobs.len(), "loaded routine jobs");
                }
            }
            Err(e) => warn!(error = %e, "failed to load routine jobs"),
        }
    }

    async fn save_jobs(&self) {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<&RoutineJob> = jobs.values().collect();
        all.sort_by(|a, b| a.bot.cmp(&b.bot));
        match serde_json::to_string_pretty(&all) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.jobs_path(), json) {
                    warn!(error = %e, "failed to persist routine jobs");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize routine jobs"),
        }
    }

    // ────────────── Job management ──────────────

    /// Register or replace a bot's routine.
    pub async fn schedule(&self, bot: &str, config: RoutineConfig) {
        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(bot.to_string(), RoutineJob::new(bot, &config));
        }
        self.save_jobs().await;
        info!(bot = %bot, interval_s = config.interval_s, "routine scheduled");
    }

    /// Disable without deleting — history and cadence survive re-enabling.
    pub async fn set_enabled(&self, bot: &str, enabled: bool) -> bool {
        let changed = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(bot) {
                Some(job) => {
                    job.enabled = enabled;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.save_jobs().await;
            info!(bot = %bot, enabled = enabled, "routine toggled");
        }
        changed
    }

    pub async fn list_jobs(&self) -> Vec<RoutineJob> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<RoutineJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.bot.cmp(&b.bot));
        all
    }

    // ────────────── Scheduling loop ──────────────

    /// Run until `stop()`. Due jobs tick concurrently across bots.
    pub async fn run(self: &Arc<Self>) {
        info!("routine service started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_S)) => {
                    self.tick_due_jobs().await;
                }
                _ = self.shutdown.notified() => {
                    info!("routine service stopping");
                    return;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    async fn tick_due_jobs(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<RoutineJob> = {
            let mut jobs = self.jobs.lock().await;
            jobs.values_mut()
                .filter(|job| job.is_due(now))
                .map(|job| {
                    job.mark_run(now);
                    job.clone()
                })
                .collect()
        };
        if due.is_empty() {
            return;
        }
        self.save_jobs().await;

        for job in due {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service.run_tick(&job, "schedule").await;
            });
        }
    }

    /// Run one tick now, bypassing the schedule.
    pub async fn trigger_now(self: &Arc<Self>, bot: &str, reason: &str) -> Option<TickRecord> {
        let job = {
            let jobs = self.jobs.lock().await;
            jobs.get(bot).cloned()
        }?;
        Some(self.run_tick(&job, reason).await)
    }

    async fn run_tick(&self, job: &RoutineJob, trigger: &str) -> TickRecord {
        // Serial within a bot; concurrent across bots.
        let lock = {
            let mut locks = self.bot_locks.lock().await;
            locks.entry(job.bot.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        debug!(bot = %job.bot, trigger = %trigger, checks = job.checks.len(), "routine tick");

        let mut outcomes = Vec::with_capacity(job.checks.len());
        for check in &job.checks {
            let result = (self.runner)(job.bot.clone(), check.clone()).await;
            outcomes.push(match result {
                Ok(detail) => CheckOutcome {
                    check: check.clone(),
                    success: true,
                    detail: (!detail.is_empty()).then_some(detail),
                },
                Err(e) => CheckOutcome {
                    check: check.clone(),
                    success: false,
                    detail: Some(e.to_string()),
                },
            });
        }

        let record = TickRecord {
            bot: job.bot.clone(),
            timestamp: Utc::now(),
            trigger: trigger.to_string(),
            outcomes,
        };

        self.append_history(job, &record);
        if record.success_rate() < MISTAKE_THRESHOLD {
            self.append_mistake(job, &record);
        }
        record
    }

    fn append_history(&self, job: &RoutineJob, record: &TickRecord) {
        let path = self.history_path(&job.bot);
        if let Err(e) = append_line(&path, record) {
            warn!(bot = %job.bot, error = %e, "failed to append tick history");
            return;
        }
        // Trim to the retention window.
        if let Ok(content) = std::fs::read_to_string(&path) {
            let lines: Vec<&str> = content.lines().collect();
            if lines.len() > job.retain_history_count {
                let kept = &lines[lines.len() - job.retain_history_count..];
                let _ = std::fs::write(&path, format!("{}\n", kept.join("\n")));
            }
        }
    }

    fn append_mistake(&self, job: &RoutineJob, record: &TickRecord) {
        let failed: Vec<&str> = record
            .outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.check.as_str())
            .collect();
        let mistake = serde_json::json!({
            "timestamp": record.timestamp,
            "bot": record.bot,
            "failed_checks": failed,
            "success_rate": record.success_rate(),
        });
        if let Err(e) = append_line(&self.mistakes_path(&job.bot), &mistake) {
            warn!(bot = %job.bot, error = %e, "failed to append mistake record");
        }
    }

    pub fn tick_history(&self, bot: &str, limit: usize) -> Vec<TickRecord> {
        let Ok(content) = std::fs::read_to_string(self.history_path(bot)) else {
            return Vec::new();
        };
        let mut records: Vec<TickRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        records
    }
}

fn append_line<T: serde::Serialize>(path: &PathBuf, value: &T) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn ok_runner() -> RoutineRunner {
        Arc::new(|_bot, check| Box::pin(async move { Ok(format!("{check} fine")) }))
    }

    fn make_service(dir: &std::path::Path, runner: RoutineRunner) -> Arc<RoutineService> {
        Arc::new(RoutineService::new(dir.to_path_buf(), runner).unwrap())
    }

    fn config(checks: &[&str]) -> RoutineConfig {
        RoutineConfig {
            interval_s: 3600,
            enabled: true,
            checks: checks.iter().map(|c| c.to_string()).collect(),
            retain_history_count: 3,
        }
    }

    #[tokio::test]
    async fn test_trigger_now_runs_checks() {
        let dir = tempdir().unwrap();
        let service = make_service(dir.path(), ok_runner());
        service.schedule("coder", config(&["inbox", "tasks"])).await;

        let record = service.trigger_now("coder", "manual").await.unwrap();
        assert_eq!(record.trigger, "manual");
        assert_eq!(record.outcomes.len(), 2);
        assert!(record.outcomes.iter().all(|o| o.success));
        assert_eq!(record.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_trigger_unknown_bot_is_none() {
        let dir = tempdir().unwrap();
        let service = make_service(dir.path(), ok_runner());
        assert!(service.trigger_now("ghost", "manual").await.is_none());
    }

    #[tokio::test]
    async fn test_history_appended_and_trimmed() {
        let dir = tempdir().unwrap();
        let service = make_service(dir.path(), ok_runner());
        service.schedule("coder", config(&["inbox"])).await;

        for _ in 0..5 {
            service.trigger_now("coder", "manual").await.unwrap();
        }
        // retain_history_count = 3
        let history = service.tick_history("coder", 10);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_low_success_appends_mistake() {
        let dir = tempdir().unwrap();
        let failing: RoutineRunner =
            Arc::new(|_bot, _check| Box::pin(async { anyhow::bail!("check broke") }));
        let service = make_service(dir.path(), failing);
        service.schedule("coder", config(&["inbox", "tasks"])).await;

        let record = service.trigger_now("coder", "manual").await.unwrap();
        assert_eq!(record.success_rate(), 0.0);

        let mistakes =
            std::fs::read_to_string(dir.path().join("routines/mistakes-coder.jsonl")).unwrap();
        assert!(mistakes.contains("inbox"));
        assert!(mistakes.contains("\"success_rate\":0.0"));
    }

    #[tokio::test]
    async fn test_disable_keeps_job() {
        let dir = tempdir().unwrap();
        let service = make_service(dir.path(), ok_runner());
        service.schedule("coder", config(&["inbox"])).await;

        assert!(service.set_enabled("coder", false).await);
        let jobs = service.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);
        assert!(!service.set_enabled("ghost", false).await);
    }

    #[tokio::test]
    async fn test_jobs_persist_across_restart() {
        let dir = tempdir().unwrap();
        {
            let service = make_service(dir.path(), ok_runner());
            service.schedule("researcher", config(&["news"])).await;
            service.set_enabled("researcher", false).await;
        }
        {
            let service = tokio::task::spawn_blocking({
                let path = dir.path().to_path_buf();
                move || RoutineService::new(path, ok_runner()).unwrap()
            })
            .await
            .unwrap();
            let jobs = service.list_jobs().await;
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].bot, "researcher");
            assert!(!jobs[0].enabled);
        }
    }

    #[tokio::test]
    async fn test_ticks_serial_within_bot() {
        let dir = tempdir().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let runner: RoutineRunner = {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            Arc::new(move |_bot, _check| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                Box::pin(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(String::new())
                })
            })
        };
        let service = make_service(dir.path(), runner);
        service.schedule("coder", config(&["one"])).await;

        let a = service.clone();
        let b = service.clone();
        let (r1, r2) = tokio::join!(a.trigger_now("coder", "m1"), b.trigger_now("coder", "m2"));
        assert!(r1.is_some() && r2.is_some());
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
