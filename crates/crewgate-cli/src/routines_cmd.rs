//! Routine management commands.

use anyhow::Result;
use clap::Subcommand;

use crewgate_core::config::load_config;

use crate::gateway::build_runtime;

#[derive(Subcommand)]
pub enum RoutinesCommands {
    /// List scheduled routines
    List,

    /// Schedule (or replace) a bot's routine
    Schedule {
        bot: String,
        /// Comma-separated check names
        checks: String,
        /// Seconds between ticks
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Enable a bot's routine
    Enable { bot: String },

    /// Disable a bot's routine (job record is kept)
    Disable { bot: String },

    /// Run a bot's routine right now
    Trigger {
        bot: String,
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },

    /// Show a bot's recent tick history
    History {
        bot: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

pub async fn dispatch(action: RoutinesCommands) -> Result<()> {
    let config = load_config(None);
    let default_interval = config.routines.default_interval_s;
    let retain = config.routines.retain_history_count;
    let runtime = build_runtime(config)?;
    let routines = runtime.routines;

    match action {
        RoutinesCommands::List => {
            let jobs = routines.list_jobs().await;
            if jobs.is_empty() {
                println!("no routines scheduled");
            }
            for job in jobs {
                println!(
                    "@{} every {}s [{}] {} (last: {})",
                    job.bot,
                    job.interval_s,
                    job.checks.join(", "),
                    if job.enabled { "enabled" } else { "disabled" },
                    job.last_run
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into()),
                );
            }
        }
        RoutinesCommands::Schedule {
            bot,
            checks,
            interval,
        } => {
            let checks: Vec<String> = checks
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            anyhow::ensure!(!checks.is_empty(), "need at least one check name");
            routines
                .schedule(
                    &bot,
                    crewgate_routines::RoutineConfig {
                        interval_s: interval.unwrap_or(default_interval),
                        enabled: true,
                        checks: checks.clone(),
                        retain_history_count: retain,
                    },
                )
                .await;
            println!("scheduled @{bot}: {}", checks.join(", "));
        }
        RoutinesCommands::Enable { bot } => {
            println!(
                "{}",
                if routines.set_enabled(&bot, true).await {
                    "enabled"
                } else {
                    "no such routine"
                }
            );
        }
        RoutinesCommands::Disable { bot } => {
            println!(
                "{}",
                if routines.set_enabled(&bot, false).await {
                    "disabled"
                } else {
                    "no such routine"
                }
            );
        }
        RoutinesCommands::Trigger { bot, reason } => match routines.trigger_now(&bot, &reason).await {
            Some(record) => {
                for outcome in &record.outcomes {
                    let mark = if outcome.success { "✓" } else { "✗" };
                    println!(
                        "{mark} {} {}",
                        outcome.check,
                        outcome.detail.as_deref().unwrap_or("")
                    );
                }
            }
            None => println!("no routine scheduled for @{bot}"),
        },
        RoutinesCommands::History { bot, limit } => {
            for record in routines.tick_history(&bot, limit) {
                let ok = record.outcomes.iter().filter(|o| o.success).count();
                println!(
                    "{} [{}] {}/{} checks ok",
                    record.timestamp.to_rfc3339(),
                    record.trigger,
                    ok,
                    record.outcomes.len()
                );
            }
        }
    }

    Ok(())
}
