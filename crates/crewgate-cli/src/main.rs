//! Crewgate CLI — entry point.
//!
//! # Commands
//!
//! - `crewgate chat [-m MESSAGE]` — talk to the crew (single-shot or REPL)
//! - `crewgate gateway` — run the full gateway
//! - `crewgate status` — configuration and room overview
//! - `crewgate rooms …` — manage rooms and channel mappings
//! - `crewgate routines …` — manage bot routines
//! - `crewgate security …` — keys and the audit log

mod gateway;
mod helpers;
mod repl;
mod rooms_cmd;
mod routines_cmd;
mod security_cmd;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Crewgate — a multi-bot chat gateway
#[derive(Parser)]
#[command(name = "crewgate", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the crew (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Start the gateway (brokers + agent loop + routines)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and room status
    Status,

    /// Manage rooms and channel mappings
    Rooms {
        #[command(subcommand)]
        action: rooms_cmd::RoomsCommands,
    },

    /// Manage bot routines
    Routines {
        #[command(subcommand)]
        action: routines_cmd::RoutinesCommands,
    },

    /// Keys and audit log
    Security {
        #[command(subcommand)]
        action: security_cmd::SecurityCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { message, logs } => {
            init_logging(logs);
            repl::run(message).await
        }
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Status => {
            init_logging(false);
            status::run()
        }
        Commands::Rooms { action } => {
            init_logging(false);
            rooms_cmd::dispatch(action)
        }
        Commands::Routines { action } => {
            init_logging(false);
            routines_cmd::dispatch(action).await
        }
        Commands::Security { action } => {
            init_logging(false);
            security_cmd::dispatch(action)
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("crewgate=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
