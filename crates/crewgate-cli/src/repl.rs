//! Interactive chat — rustyline REPL on the `cli` channel.
//!
//! Messages go through the same path as any channel: published as inbound
//! envelopes, serialized by the room broker, answered on the outbound bus.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use crewgate_core::bus::MessageEnvelope;
use crewgate_core::config::load_config;

use crate::gateway::{build_runtime, Runtime};
use crate::helpers;

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Generous ceiling for one turn (tool chains can be slow).
const REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// Run single-shot (with `message`) or as an interactive REPL.
pub async fn run(message: Option<String>) -> Result<()> {
    let config = load_config(None);
    let runtime = Arc::new(build_runtime(config)?);

    match message {
        Some(text) => {
            let reply = send_and_wait(&runtime, &text).await?;
            helpers::print_response(&reply);
            Ok(())
        }
        None => run_interactive(runtime).await,
    }
}

async fn run_interactive(runtime: Arc<Runtime>) -> Result<()> {
    helpers::print_banner();
    let mut editor = create_editor()?;

    // Feed system announcements (delegation results) back through the
    // broker; their summaries surface as extra outbound replies.
    let intake = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            while let Some(env) = runtime.bus.consume_inbound().await {
                if let Err(e) = runtime.brokers.ingest(env).await {
                    tracing::warn!(error = %e, "failed to re-ingest announcement");
                }
            }
        })
    };

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye 👋");
            break;
        }
        let _ = editor.add_history_entry(&input);

        debug!(input = trimmed, "processing REPL input");
        helpers::print_thinking();
        match send_and_wait(&runtime, trimmed).await {
            Ok(reply) => {
                helpers::clear_thinking();
                helpers::print_response(&reply);
            }
            Err(e) => {
                helpers::clear_thinking();
                eprintln!("\n❌ {e}\n");
            }
        }
    }

    intake.abort();
    runtime.brokers.shutdown().await;
    save_history(&mut editor);
    Ok(())
}

/// Publish one inbound envelope and wait for the turn's reply.
///
/// System-channel announcements (delegation results) may land in between;
/// they are fed back through the broker and printed as extra replies.
async fn send_and_wait(runtime: &Arc<Runtime>, text: &str) -> Result<String> {
    let env = MessageEnvelope::inbound("cli", "user", "direct", text);
    runtime.brokers.ingest(env).await?;

    let reply = tokio::time::timeout(REPLY_TIMEOUT, runtime.bus.consume_outbound())
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for a reply"))?
        .ok_or_else(|| anyhow::anyhow!("bus closed"))?;
    Ok(reply.content)
}

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;
    let path = history_path();
    if path.exists() {
        let _ = editor.load_history(&path);
    }
    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

fn history_path() -> std::path::PathBuf {
    crewgate_core::utils::get_data_path()
        .join("history")
        .join("cli_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}
