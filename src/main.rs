//! graphqa: answer one question from the knowledge graph.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse arguments
//!   3. Load config
//!   4. Init logger (`-v` > `GRAPHQA_LOG_LEVEL` > config)
//!   5. Check the question and the API key
//!   6. Run the pipeline and print one JSON object
//!
//! Every pipeline outcome, including a failed run, exits 0. Only setup
//! problems exit 1, still with a JSON object on stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::debug;

use graphqa::error::AppError;
use graphqa::llm::providers;
use graphqa::logger::Precedence;
use graphqa::{PipelineOutcome, config, logger, pipeline};

#[derive(Parser)]
#[command(name = "graphqa", version, about = "Ask the knowledge graph a question")]
struct Cli {
    /// Natural-language question. Unquoted words are joined with spaces.
    #[arg(num_args = 1.., allow_hyphen_values = true, trailing_var_arg = true)]
    question: Vec<String>,

    /// Config file (default: config/default.toml when present).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). Logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(outcome) => {
            println!("{}", outcome.to_json());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", PipelineOutcome::error_message(&e).to_json());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<PipelineOutcome, AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let cli = parse_args(std::env::args_os())?;
    let config = config::load(cli.config.as_deref())?;

    let level = logger::level_for_verbosity(cli.verbose).unwrap_or(&config.log_level);
    logger::init(level, Precedence::Explicit)?;

    let question = cli.question.join(" ");
    let question = question.trim();
    if question.is_empty() {
        return Err(AppError::Config("no question provided".into()));
    }

    let api_key = config.require_api_key()?.to_string();
    let provider = providers::build(&config.llm, Some(api_key))
        .map_err(|e| AppError::Config(e.to_string()))?;
    debug!(model = provider.model(), graph = %config.graph.uri, "starting run");

    Ok(pipeline::ask(&config, &provider, question).await)
}

/// Parse arguments. Usage errors become `AppError::Config` so they still
/// produce a JSON object; `--help` and `--version` print and exit as usual.
fn parse_args<I, T>(args: I) -> Result<Cli, AppError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
        _ => {
            let rendered = e.to_string();
            let first = rendered.lines().next().unwrap_or_default();
            AppError::Config(format!("invalid arguments: {}", first.trim_start_matches("error: ")))
        }
    })
}
