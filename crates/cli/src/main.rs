//! Glimpse CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive chat or single-message mode (the default)
//! - `doctor`: Diagnose configuration and connectivity

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod presenter;

#[derive(Parser)]
#[command(
    name = "glimpse",
    about = "Glimpse — search the web, see the pictures, read the answer",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.glimpse/config.toml)
    #[arg(short, long, global = true, env = "GLIMPSE_CONFIG")]
    config: Option<PathBuf>,

    /// Model invocations allowed per question (1-15)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=15))]
    max_steps: Option<u32>,

    /// Keep the conversation in memory only
    #[arg(long, global = true)]
    no_log: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the transcript
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Chat { message: None }) {
        Commands::Chat { message } => {
            let options = commands::chat::ChatOptions {
                config_path: cli.config,
                message,
                max_steps: cli.max_steps,
                no_log: cli.no_log,
            };
            commands::chat::run(options).await?
        }
        Commands::Doctor => commands::doctor::run(cli.config.as_deref()).await?,
    }

    Ok(())
}
