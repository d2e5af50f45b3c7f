//! `glimpse chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use glimpse_agent::AgentLoop;
use glimpse_config::{AppConfig, ConfigError, PROVIDER_PREFERENCE};
use glimpse_providers::router::{build_from_selection, build_search};
use glimpse_render::terminal_width;
use glimpse_session::{ConversationLog, FileLogStore, HistoryMode, ImageIdAllocator};
use glimpse_tools::{HttpImageFetcher, ImagePipeline, ToolBox, WebSearchTool};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::presenter::TerminalPresenter;

pub struct ChatOptions {
    pub config_path: Option<PathBuf>,
    pub message: Option<String>,
    pub max_steps: Option<u32>,
    pub no_log: bool,
}

pub fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config_path.as_deref())
        .map_err(|e| format!("Failed to load config: {e}"))?;

    // No usable model credential is the one fatal configuration error
    let selection = match config.select_provider() {
        Ok(selection) => selection,
        Err(e) => {
            print_credential_help(&e);
            return Err(e.into());
        }
    };

    let provider = build_from_selection(&selection);
    let search = build_search(&config).map(|b| WebSearchTool::new(b, config.search.cost_ceiling));
    if search.is_none() {
        warn!("VALYU_API_KEY not set; web search is disabled");
    }

    let pipeline = ImagePipeline::new(
        Arc::new(HttpImageFetcher::new()),
        provider.clone(),
        selection.vision_model.clone(),
        config.images_dir(),
        ImageIdAllocator::new(),
    );
    let search_enabled = search.is_some();
    let tools = ToolBox::new(search, pipeline);

    let log = open_log(&config, options.no_log);
    let history_mode: HistoryMode = config.agent.history_mode.parse().unwrap_or_default();

    let mut agent = AgentLoop::new(provider, &selection.model, tools, log)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_max_steps(options.max_steps.unwrap_or(config.agent.max_steps))
        .with_history_mode(history_mode);

    let mut presenter = TerminalPresenter::new(std::io::stdout(), terminal_width());

    if let Some(msg) = options.message {
        agent.run_turn(&msg, &mut presenter).await;
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║            Glimpse — Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", selection.kind.name());
    println!("  Model:     {}", selection.model);
    println!("  Vision:    {}", selection.vision_model);
    println!(
        "  Search:    {}",
        if search_enabled { "enabled" } else { "disabled (set VALYU_API_KEY)" }
    );
    println!("  Steps:     {} per question", agent.max_steps());
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit', 'quit' or an empty line to leave.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if is_sentinel(input) {
            break;
        }

        println!();
        let result = agent.run_turn(input, &mut presenter).await;
        info!(
            steps = result.steps,
            tool_calls = result.tool_calls,
            images = result.images.len(),
            "Answered"
        );
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Inputs that end the session.
fn is_sentinel(input: &str) -> bool {
    input.is_empty() || matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit")
}

fn open_log(config: &AppConfig, no_log: bool) -> ConversationLog {
    if no_log {
        return ConversationLog::in_memory();
    }
    let path = config.log_path();
    match FileLogStore::open(&path) {
        Ok(store) => {
            info!(path = %path.display(), "Persisting conversation");
            ConversationLog::new(Box::new(store))
        }
        Err(e) => {
            warn!(error = %e, "Conversation log unavailable; keeping it in memory only");
            ConversationLog::in_memory()
        }
    }
}

fn print_credential_help(error: &ConfigError) {
    eprintln!();
    eprintln!("  ERROR: {error}");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    for kind in PROVIDER_PREFERENCE {
        eprintln!("    {:<20} ({})", kind.env_key(), kind.name());
    }
    eprintln!();
    eprintln!("  Or add a key to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    eprintln!("  Optional: VALYU_API_KEY enables web and image search.");
    eprintln!();
}
