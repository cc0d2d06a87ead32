//! Inkwell - multi-agent writing assistant
//!
//! Main entry point for the Inkwell CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use inkwell_config::{LoadedConfig, LoggingConfig};
use inkwell_llm::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;

mod bootstrap;
mod commands;

use commands::{chat, models, test, workflow};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Inkwell - multi-agent writing assistant
#[derive(Parser)]
#[command(name = "inkwell")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the discovered layers
    #[arg(short, long, global = true, env = "INKWELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Provider to use instead of the configured default
    #[arg(short, long, global = true)]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one prompt and stream the reply
    Chat(chat::ChatArgs),

    /// List the models every provider offers
    Models(models::ModelsArgs),

    /// Test provider connections
    Test(test::TestArgs),

    /// Run or check workflow files
    Workflow(workflow::WorkflowArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

const CRATES: &[&str] = &[
    "inkwell",
    "inkwell_llm",
    "inkwell_mcp",
    "inkwell_memory",
    "inkwell_agent",
    "inkwell_workflow",
    "inkwell_config",
];

fn directives(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.push(fallback.to_string());
    directives.join(",")
}

/// Console (human-readable, stderr) plus an optional rotating JSON file.
/// `RUST_LOG` overrides the console filter.
fn init_tracing(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let level = if verbose { "debug" } else { logging.level.as_str() };
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(level, "warn")));
    let console = fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = if logging.file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(inkwell_config::log_dir)
            .unwrap_or_else(|| PathBuf::from("logs"));
        let appender = tracing_appender::rolling::daily(&log_dir, "inkwell.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new(directives("trace", "info")));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    match &cli.config {
        Some(path) => inkwell_config::load_explicit(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => inkwell_config::load_config(None).context("failed to load configuration"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(&cli)?;
    let _guard = init_tracing(cli.verbose, &loaded.config.logging());
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!(sources = ?loaded.loaded_from(), "Configuration loaded");

    // Workflow validation needs no providers.
    if let Commands::Workflow(args) = &cli.command
        && let Some(result) = workflow::run_offline(args)
    {
        return result;
    }

    let app = bootstrap::App::build(loaded.config, cli.provider.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let ctx = commands::Context {
        app,
        provider: cli.provider,
        verbose: cli.verbose,
        cancel,
    };

    let result = match cli.command {
        Commands::Chat(args) => chat::run(args, &ctx).await,
        Commands::Models(args) => models::run(args, &ctx).await,
        Commands::Test(args) => test::run(args, &ctx).await,
        Commands::Workflow(args) => workflow::run(args, &ctx).await,
    };

    ctx.app.manager.shutdown().await;
    result
}
