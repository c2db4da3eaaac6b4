//! cadre CLI: the main entry point.
//!
//! Commands:
//! - `exec`   Send one message to a team and print the answer
//! - `run`    Chat with a team line by line
//! - `check`  Validate a team file and the environment it needs

use clap::{Parser, Subcommand};

mod commands;
mod render;

use commands::TeamArgs;

#[derive(Debug, Parser)]
#[command(name = "cadre", about = "cadre: run teams of AI agents", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a single message and print the final answer
    Exec {
        #[command(flatten)]
        team: TeamArgs,

        /// Model calls allowed for this run (0 = agent setting or no limit)
        #[arg(long, default_value_t = 0)]
        max_iterations: u32,

        /// The message; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Chat with a team interactively
    Run {
        #[command(flatten)]
        team: TeamArgs,
    },

    /// Validate a team file and required environment variables
    Check {
        #[command(flatten)]
        team: TeamArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the conversation
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Exec {
            team,
            max_iterations,
            message,
        } => commands::exec::run(team, max_iterations, message).await,
        Commands::Run { team } => commands::run::run(team).await,
        Commands::Check { team } => commands::check::run(team).await,
    }
}
