//! graphqa-server: JSON HTTP API over the question pipeline.
//!
//! Binds `[server].bind` (default `127.0.0.1:3001`) and shuts down
//! gracefully on Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use graphqa::error::AppError;
use graphqa::llm::providers;
use graphqa::server::{self, AppState};
use graphqa::logger::Precedence;
use graphqa::{config, logger};

#[derive(Parser)]
#[command(name = "graphqa-server", version, about = "Serve the question pipeline over HTTP")]
struct Cli {
    /// Config file (default: config/default.toml when present).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override `[server].bind`, e.g. `0.0.0.0:3001`.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    // Without -v, RUST_LOG wins over the configured level.
    let verbose = logger::level_for_verbosity(cli.verbose);
    let precedence = if verbose.is_some() { Precedence::Explicit } else { Precedence::Environment };
    logger::init(verbose.unwrap_or(&config.log_level), precedence)?;

    let api_key = config.require_api_key()?.to_string();
    let provider = providers::build(&config.llm, Some(api_key))
        .map_err(|e| AppError::Config(e.to_string()))?;

    let shutdown = CancellationToken::new();
    server::cancel_on_ctrl_c(shutdown.clone());
    server::serve(AppState::new(config, provider), shutdown).await
}
