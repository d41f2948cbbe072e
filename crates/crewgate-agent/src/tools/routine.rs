//! Routine tool — lets bots schedule, toggle, and trigger periodic
//! routines through the routine service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crewgate_routines::{RoutineConfig, RoutineService};

use super::base::{optional_i64, optional_string, require_string, Tool};

pub struct RoutineTool {
    service: Arc<RoutineService>,
    default_interval_s: u64,
    retain_history_count: usize,
}

impl RoutineTool {
    pub fn new(service: Arc<RoutineService>, default_interval_s: u64, retain_history_count: usize) -> Self {
        Self {
            service,
            default_interval_s,
            retain_history_count,
        }
    }
}

#[async_trait]
impl Tool for RoutineTool {
    fn name(&self) -> &str {
        "routine"
    }

    fn description(&self) -> &str {
        "Manage a bot's periodic routine: schedule named checks on an interval, \
         enable/disable, trigger a tick now, or list routines."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["schedule", "enable", "disable", "trigger", "list"],
                    "description": "What to do"
                },
                "bot": { "type": "string", "description": "Target bot" },
                "checks": { "type": "string", "description": "Comma-separated check names (for schedule)" },
                "interval_s": { "type": "integer", "description": "Seconds between ticks (for schedule)" },
                "reason": { "type": "string", "description": "Why (for trigger)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;

        match action.as_str() {
            "schedule" => {
                let bot = require_string(&params, "bot")?;
                let checks: Vec<String> = require_string(&params, "checks")?
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if checks.is_empty() {
                    anyhow::bail!("schedule needs at least one check name");
                }
                let interval_s = optional_i64(&params, "interval_s")
                    .map(|s| s.max(60) as u64)
                    .unwrap_or(self.default_interval_s);

                self.service
                    .schedule(
                        &bot,
                        RoutineConfig {
                            interval_s,
                            enabled: true,
                            checks: checks.clone(),
                            retain_history_count: self.retain_history_count,
                        },
                    )
                    .await;
                Ok(format!(
                    "Scheduled routine for @{bot}: [{}] every {interval_s}s",
                    checks.join(", ")
                ))
            }
            "enable" | "disable" => {
                let bot = require_string(&params, "bot")?;
                let enabled = action == "enable";
                if self.service.set_enabled(&bot, enabled).await {
                    Ok(format!("Routine for @{bot} {action}d"))
                } else {
                    Ok(format!("No routine scheduled for @{bot}"))
                }
            }
            "trigger" => {
                let bot = require_string(&params, "bot")?;
                let reason = optional_string(&params, "reason").unwrap_or_else(|| "manual".into());
                match self.service.trigger_now(&bot, &reason).await {
                    Some(record) => {
                        let ok = record.outcomes.iter().filter(|o| o.success).count();
                        Ok(format!(
                            "Ran {} checks for @{bot}: {ok} ok, {} failed",
                            record.outcomes.len(),
                            record.outcomes.len() - ok
                        ))
                    }
                    None => Ok(format!("No routine scheduled for @{bot}")),
                }
            }
            "list" => {
                let jobs = self.service.list_jobs().await;
                if jobs.is_empty() {
                    return Ok("No routines scheduled.".into());
                }
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| {
                        format!(
                            "- @{} every {}s [{}] {}",
                            j.bot,
                            j.interval_s,
                            j.checks.join(", "),
                            if j.enabled { "enabled" } else { "disabled" }
                        )
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            other => anyhow::bail!("unknown action '{other}'"),
        }
    }
}
