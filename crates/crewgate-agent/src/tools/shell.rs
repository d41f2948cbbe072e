//! Shell tool — execute commands in a subprocess.
//!
//! Guarded by a deny-pattern list, the shared path policy, and a per-call
//! timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::base::{optional_i64, optional_string, require_string, Tool};
use super::filesystem::PathPolicy;

/// Output truncation cap (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Command shapes that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

fn deny_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        DENY_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("deny pattern compiles"))
            .collect()
    })
}

pub struct ExecTool {
    policy: Arc<PathPolicy>,
    timeout: Duration,
}

impl ExecTool {
    pub fn new(policy: Arc<PathPolicy>, timeout_secs: Option<u64>) -> Self {
        Self {
            policy,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Returns the reason a command is blocked, or `None` when it may run.
    fn guard(&self, command: &str) -> Option<String> {
        let lower = command.to_lowercase();
        for re in deny_regexes() {
            if re.is_match(&lower) {
                warn!(command = %command, "command blocked by safety guard");
                return Some("Command blocked by safety guard (dangerous pattern detected)".into());
            }
        }

        if self.policy.restrict_to_workspace || !self.policy.allowed_paths.is_empty() {
            if command.contains("../") || command.contains("..\\") {
                return Some("Command blocked: path traversal is not allowed here".into());
            }
            // Absolute paths named in the command must satisfy the policy.
            for token in command.split_whitespace() {
                let token = token.trim_matches(|c| c == '"' || c == '\'');
                if token.starts_with('/') && self.policy.resolve(token).is_err() {
                    return Some(format!("Command blocked: '{token}' is outside the allowed paths"));
                }
            }
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout/stderr. Runs in the workspace by default."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The command to run" },
                "working_dir": { "type": "string", "description": "Working directory (optional)" },
                "timeout": { "type": "integer", "description": "Timeout in seconds (optional)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;

        if let Some(reason) = self.guard(&command) {
            return Ok(format!("Error: {reason}"));
        }

        let cwd = match optional_string(&params, "working_dir") {
            Some(dir) => self.policy.resolve(&dir)?,
            None => self.policy.workspace.clone(),
        };
        let timeout = optional_i64(&params, "timeout")
            .map(|s| Duration::from_secs(s.max(1) as u64))
            .unwrap_or(self.timeout);

        info!(command = %command, cwd = %cwd.display(), "executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(format!(
                    "Error: command timed out after {}s",
                    timeout.as_secs()
                ))
            }
        };

        let mut text = String::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            text.push_str(stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push_str("\n--- stderr ---\n");
            }
            text.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            text = format!("(exit code {code})\n{text}");
        }
        if text.is_empty() {
            text = "(no output)".into();
        }
        if text.chars().count() > MAX_OUTPUT_LEN {
            let truncated: String = text.chars().take(MAX_OUTPUT_LEN).collect();
            text = format!("{truncated}\n… (output truncated)");
        }

        Ok(text)
    }
}
