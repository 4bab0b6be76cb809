//! graphqa: natural-language questions over a Neo4j knowledge graph.
//!
//! A question is turned into Cypher by a language model, run against the
//! graph, and the rows are turned back into a plain-language answer. See
//! [`pipeline`] for the stages and [`graph`] for the store adapter.

pub mod config;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod logger;
pub mod pipeline;
#[cfg(feature = "http-api")]
pub mod server;

pub use pipeline::{Pipeline, PipelineOutcome, ask};
