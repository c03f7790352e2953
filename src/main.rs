//! Chatvine CLI
//!
//! Subcommand wiring and terminal presentation around the dispatch core.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Input;

use chatvine::config::{self, ChatvineConfig};
use chatvine::dispatch::{usage_totals, DispatchOptions, Dispatcher};
use chatvine::inference::OpenAiChatClient;
use chatvine::log::LogStore;
use chatvine::tokens::HeuristicTokenCounter;
use chatvine::tools::{DuckDuckGoSearchClient, ToolRegistry, WolframComputeClient};
use chatvine::types::{RecordRole, RetryPolicy};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chatvine -- conversational CLI with an append-only, branchable history
#[derive(Parser, Debug)]
#[command(name = "chatvine", version = VERSION, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the model (default)
    Chat {
        /// Conversation name to start or continue
        #[arg(short = 'n', long = "conversation", default_value = "default")]
        name: String,
        /// Continue the most recently active conversation
        #[arg(short = 'c', long = "continue")]
        continue_latest: bool,
        /// Ask a single question and exit
        #[arg(short, long)]
        quick: Option<String>,
        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },
    /// Print a conversation's history
    Show {
        name: String,
        /// Show only the most recent exchange
        #[arg(short, long)]
        short: bool,
        /// Output raw records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conversations, most recently active first
    Log,
    /// Branch a new conversation off a record in an existing one
    Fork {
        name: String,
        at_record_id: String,
        new_name: String,
    },
    /// Show total recorded token usage
    Usage,
    /// Write a default config file
    Init,
}

fn build_dispatcher(config: &ChatvineConfig, model_override: Option<String>) -> Result<Dispatcher> {
    let store = LogStore::open(&config::resolve_path(&config.db_path))
        .context("failed to open conversation log")?;

    let retry = RetryPolicy {
        max_attempts: config.retry_max_attempts,
        base_delay_ms: config.retry_base_delay_ms,
        ..Default::default()
    };
    let inference = Arc::new(OpenAiChatClient::new(
        config.api_url.clone(),
        config.api_key.clone(),
        config.max_response_tokens,
        retry,
    ));

    let registry = ToolRegistry::new(
        Box::new(DuckDuckGoSearchClient::new()),
        Box::new(WolframComputeClient::new(config.wolfram_app_id.clone())),
    );

    let options = DispatchOptions {
        model: model_override.unwrap_or_else(|| config.model.clone()),
        max_tool_rounds: config.max_tool_rounds,
        context_budget: (config.context_budget > 0).then_some(config.context_budget),
        system_prompt: (!config.system_prompt.is_empty()).then(|| config.system_prompt.clone()),
    };

    Ok(Dispatcher::new(
        store,
        inference,
        registry,
        Box::new(HeuristicTokenCounter),
        options,
    ))
}

fn print_turn(role: RecordRole, text: &str) {
    match role {
        RecordRole::User => println!("{}", format!(">> {text}").magenta()),
        RecordRole::System => println!("{}", text.blue()),
        RecordRole::Assistant => println!("{text}"),
        RecordRole::ToolCall => println!("{}", format!("[tool] {text}").yellow()),
        RecordRole::ToolResult => println!("{}", format!("[result] {text}").yellow()),
    }
}

fn report_turn_error(err: &chatvine::error::CoreError) {
    eprintln!(
        "{}",
        format!(
            "Turn failed at {}: {}. The conversation log is intact; rerun to resume.",
            err.stage(),
            err
        )
        .red()
    );
}

async fn run_chat(
    name: &str,
    continue_latest: bool,
    quick: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let config = config::load_config();
    if config.api_key.is_empty() {
        anyhow::bail!("no API key configured; set CHATVINE_API_KEY or run `chatvine init`");
    }
    let dispatcher = build_dispatcher(&config, model)?;

    let name = if continue_latest {
        dispatcher
            .store()
            .conversations()?
            .first()
            .map(|entry| entry.name.clone())
            .ok_or_else(|| anyhow::anyhow!("no conversation to continue"))?
    } else {
        name.to_string()
    };
    let name = name.as_str();

    if let Some(question) = quick {
        match dispatcher.start_or_continue(name, &question).await {
            Ok(answer) => println!("{answer}"),
            Err(err) => {
                report_turn_error(&err);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    println!("{}", "(empty input exits)".dimmed());
    loop {
        let question: String = Input::new().with_prompt(">>").allow_empty(true).interact_text()?;
        let question = question.trim().to_string();
        if question.is_empty() {
            break;
        }
        match dispatcher.start_or_continue(name, &question).await {
            Ok(answer) => println!("{answer}"),
            Err(err) => report_turn_error(&err),
        }
    }
    Ok(())
}

fn run_show(name: &str, short: bool, json: bool) -> Result<()> {
    let config = config::load_config();
    let store = LogStore::open(&config::resolve_path(&config.db_path))?;
    let leaf = store.latest_leaf(name)?;
    let chain = store.chain(&leaf)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    let turns = chatvine::conversation::ConversationModel::new(chain).display_turns();
    let shown = if short {
        &turns[turns.len().saturating_sub(2)..]
    } else {
        &turns[..]
    };
    for turn in shown {
        print_turn(turn.role, &turn.text);
    }
    Ok(())
}

fn run_log() -> Result<()> {
    let config = config::load_config();
    let store = LogStore::open(&config::resolve_path(&config.db_path))?;
    for entry in store.conversations()? {
        let chain = store.chain(&entry.leaf_id)?;
        let first_user = chain
            .iter()
            .find(|r| r.role == RecordRole::User)
            .map(|r| r.content.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        let trimmed: String = first_user.chars().take(80).collect();
        println!(
            "{} {} {}",
            entry.name.blue(),
            format!("({} records, {})", chain.len(), entry.updated_at).dimmed(),
            trimmed
        );
    }
    Ok(())
}

fn run_fork(name: &str, at_record_id: &str, new_name: &str) -> Result<()> {
    let config = config::load_config();
    let store = LogStore::open(&config::resolve_path(&config.db_path))?;
    let leaf = store.latest_leaf(name)?;
    let chain = store.chain(&leaf)?;
    if !chain.iter().any(|r| r.id == at_record_id) {
        anyhow::bail!("record {at_record_id} is not in conversation '{name}'");
    }
    let entry = store.fork(at_record_id, new_name)?;
    println!("Forked '{}' at {} -> '{}'", name, at_record_id, entry.name);
    Ok(())
}

fn run_usage() -> Result<()> {
    let config = config::load_config();
    let store = LogStore::open(&config::resolve_path(&config.db_path))?;
    let mut totals = chatvine::types::TokenUsage::default();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    for entry in store.conversations()? {
        let chain = store.chain(&entry.leaf_id)?;
        // forks share records; count each record once
        let fresh: Vec<_> = chain
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        let usage = usage_totals(&fresh);
        totals.prompt_tokens += usage.prompt_tokens;
        totals.completion_tokens += usage.completion_tokens;
        totals.total_tokens += usage.total_tokens;
    }
    println!("Prompt tokens:     {}", totals.prompt_tokens);
    println!("Completion tokens: {}", totals.completion_tokens);
    println!("Total tokens:      {}", totals.total_tokens);
    Ok(())
}

fn run_init() -> Result<()> {
    let path = config::get_config_path();
    if path.exists() {
        anyhow::bail!("config already exists at {}", path.display());
    }
    config::save_config(&ChatvineConfig::default())?;
    println!("Wrote default config to {}", path.display());
    println!("Set api_key there or export CHATVINE_API_KEY.");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = config::load_config();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = cli.command.unwrap_or(Command::Chat {
        name: "default".to_string(),
        continue_latest: false,
        quick: None,
        model: None,
    });

    let result = match command {
        Command::Chat {
            name,
            continue_latest,
            quick,
            model,
        } => run_chat(&name, continue_latest, quick, model).await,
        Command::Show { name, short, json } => run_show(&name, short, json),
        Command::Log => run_log(),
        Command::Fork {
            name,
            at_record_id,
            new_name,
        } => run_fork(&name, &at_record_id, &new_name),
        Command::Usage => run_usage(),
        Command::Init => run_init(),
    };

    if let Err(err) = result {
        eprintln!("{}", format!("Error: {err:#}").red());
        std::process::exit(1);
    }
}
