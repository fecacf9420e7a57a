//! Command-line interface for filechat.

mod cache;
mod chat;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use filechat::config::Config;
use filechat::kv::CachePrecision;

#[derive(Parser)]
#[command(name = "filechat")]
#[command(version)]
#[command(about = "Chat with local documents using a persistent prompt cache", long_about = None)]
#[command(subcommand_negates_reqs = true)]
pub(crate) struct Cli {
    /// Files or directories to load
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Include files with extension EXT (repeatable, comma-separated; `*` for any)
    #[arg(short = 'e', long = "ext", value_name = "EXT")]
    extensions: Vec<String>,

    /// Exclude files with extension EXT (repeatable, comma-separated)
    #[arg(short = 'x', long = "exclude", value_name = "EXT")]
    exclude: Vec<String>,

    /// Prompt cache precision: 8bit or bf16
    #[arg(long, value_name = "P", value_parser = parse_precision)]
    cache_precision: Option<CachePrecision>,

    /// Model identifier (namespaces the prompt cache)
    #[arg(long, value_name = "ID")]
    model: Option<String>,

    /// Prompt cache root directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Keep only the most recent N positions in the first cache layer
    #[arg(long, value_name = "N")]
    chunk_window: Option<usize>,

    /// Emit logs as JSON
    #[arg(long, env = "FILECHAT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or remove cached prompts
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List cached prompts for the model
    List,
    /// Remove one cached prompt by fingerprint
    Remove {
        /// Full 64-character hex fingerprint
        fingerprint: String,
        /// Precision of the file to remove (defaults to the configured one)
        #[arg(long, value_parser = parse_precision)]
        precision: Option<CachePrecision>,
    },
    /// Remove every cached prompt for the model
    Clear,
}

/// Parse arguments, set up logging and dispatch.
pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = Config::load().with_context(|| "Failed to load configuration")?;
    apply_flags(&mut config, &cli);

    match cli.command {
        Some(Commands::Cache { action }) => cache::cmd_cache(&config, action).await,
        None => chat::cmd_chat(&config, &cli.paths).await,
    }
}

// -- private helpers --

fn apply_flags(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model_id = model.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_root = Some(dir.clone());
    }
    if let Some(precision) = cli.cache_precision {
        config.cache_precision = precision;
    }
    if cli.chunk_window.is_some() {
        config.chunk_window = cli.chunk_window;
    }
    if !cli.extensions.is_empty() {
        config.extensions = cli.extensions.clone();
    }
    if !cli.exclude.is_empty() {
        config.exclude.extend(cli.exclude.iter().cloned());
    }
}

fn parse_precision(raw: &str) -> std::result::Result<CachePrecision, String> {
    raw.parse().map_err(|e: filechat::FilechatError| e.to_string())
}

/// Logs go to stderr so they never interleave with streamed answers.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
}
