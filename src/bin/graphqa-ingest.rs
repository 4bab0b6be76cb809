//! graphqa-ingest: load entity and relation CSVs into the graph store.
//!
//! Safe to run repeatedly: nodes and relationships are merged, never
//! duplicated. Prints a JSON report on stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use graphqa::error::{AppError, error_chain};
use graphqa::graph::GraphStore;
use graphqa::logger::Precedence;
use graphqa::{config, ingest, logger};

#[derive(Parser)]
#[command(name = "graphqa-ingest", version, about = "Load entity/relation CSVs into Neo4j")]
struct Cli {
    /// CSV with a `name` column.
    #[arg(long, value_name = "FILE", default_value = "nodes.csv")]
    nodes: PathBuf,

    /// CSV with `source_name`, `target_name` and `relation` columns.
    #[arg(long, value_name = "FILE", default_value = "edges.csv")]
    edges: PathBuf,

    /// Config file (default: config/default.toml when present).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(report) => {
            println!("{}", serde_json::json!(report));
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", serde_json::json!({ "error": error_chain(&e) }));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ingest::IngestReport, AppError> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    let level = logger::level_for_verbosity(cli.verbose).unwrap_or(&config.log_level);
    logger::init(level, Precedence::Explicit)?;

    let store = GraphStore::connect(&config.graph)
        .await
        .map_err(|e| AppError::Ingest(e.to_string()))?;
    info!(uri = %config.graph.uri, "connected");

    ingest::ingest(&store, &cli.nodes, &cli.edges).await
}
