//! prism-bot: paper-trading engine for binary-outcome prediction-market CLOBs.
//!
//! Usage:
//!   prism-bot [OPTIONS]
//!
//! Options:
//!   -m, --mode <MODE>     Run mode: scanner, paper, backtest
//!   --db <PATH>           SQLite path (overrides SQLITE_PATH)
//!   --speed <SPEED>       Backtest speed (0 = max, 1.0 = real-time)
//!   --start <TS>          Backtest start (unix seconds)
//!   --end <TS>            Backtest end (unix seconds)
//!   --mock-feed           Use the offline synthetic feed
//!
//! All other knobs come from the environment (a `.env` file is honored).

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prism_bot::config::{BotConfig, RunMode};
use prism_bot::mode::{run_backtest_mode, run_paper_mode, run_scanner_mode};

/// CLI arguments for prism-bot.
#[derive(Parser, Debug)]
#[command(name = "prism-bot")]
#[command(about = "Paper-trading engine for binary-outcome prediction-market CLOBs")]
#[command(version)]
struct Args {
    /// Run mode: scanner, paper, backtest
    #[arg(short, long)]
    mode: Option<String>,

    /// SQLite path (overrides SQLITE_PATH)
    #[arg(long)]
    db: Option<String>,

    /// Backtest speed multiplier (0 = max speed)
    #[arg(long)]
    speed: Option<f64>,

    /// Backtest start timestamp (unix seconds)
    #[arg(long)]
    start: Option<f64>,

    /// Backtest end timestamp (unix seconds)
    #[arg(long)]
    end: Option<f64>,

    /// Use the offline synthetic feed instead of the live socket
    #[arg(long)]
    mock_feed: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load .env before reading configuration from the environment.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();
    let mut config = BotConfig::from_env().context("failed to load configuration")?;

    // CLI overrides.
    if let Some(mode) = &args.mode {
        config.run_mode = RunMode::from_str(mode)
            .with_context(|| format!("--mode must be scanner|paper|backtest, got {:?}", mode))?;
    }
    if let Some(db) = args.db {
        config.sqlite_path = db;
    }
    if let Some(speed) = args.speed {
        config.backtest.speed = speed;
    }
    if args.start.is_some() {
        config.backtest.start_ts = args.start;
    }
    if args.end.is_some() {
        config.backtest.end_ts = args.end;
    }
    if args.mock_feed {
        config.feed.mock_feed = true;
    }

    init_logging(&config)?;

    info!(
        mode = %config.run_mode,
        sqlite_path = %config.sqlite_path,
        mock_feed = config.feed.mock_feed,
        "starting prism-bot"
    );

    config.validate().context("configuration validation failed")?;

    match config.run_mode {
        RunMode::Scanner => run_scanner_mode(config).await,
        RunMode::Paper => run_paper_mode(config).await,
        RunMode::Backtest => run_backtest_mode(config).await,
    }
}

/// One JSON object per line when JSON_LOGS=true (the default), otherwise a
/// human-readable format for development.
fn init_logging(config: &BotConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
