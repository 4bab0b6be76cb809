//! CSV ingestion into the `Entity` / `RELATION` graph.
//!
//! Nodes file: one `name` column. Edges file: `source_name`, `target_name`,
//! `relation`. Every write is a `MERGE` behind a uniqueness constraint, so
//! loading the same files twice leaves the graph unchanged.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::graph::{EdgeRecord, GraphCounts, GraphStore};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub name: String,
}

/// Summary printed by `graphqa-ingest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Distinct, non-blank node names read.
    pub nodes_read: usize,
    /// Distinct, complete edge rows read.
    pub edges_read: usize,
    /// Edges whose endpoints both exist.
    pub relations_linked: usize,
    /// Inputs that could not be found.
    pub missing_files: Vec<String>,
    pub counts: GraphCounts,
}

/// Read distinct, non-blank names. `Ok(None)` when the file does not exist.
pub fn read_nodes(path: &Path) -> Result<Option<Vec<String>>, AppError> {
    let Some(mut reader) = open(path)? else {
        return Ok(None);
    };
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for (i, row) in reader.deserialize::<NodeRecord>().enumerate() {
        let row = row.map_err(|e| AppError::Ingest(format!("{}: row {}: {e}", path.display(), i + 1)))?;
        let name = row.name.trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    Ok(Some(names))
}

/// Read distinct edges with all three fields present. `Ok(None)` when the
/// file does not exist.
pub fn read_edges(path: &Path) -> Result<Option<Vec<EdgeRecord>>, AppError> {
    let Some(mut reader) = open(path)? else {
        return Ok(None);
    };
    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();
    for (i, row) in reader.deserialize::<EdgeRecord>().enumerate() {
        let row = row.map_err(|e| AppError::Ingest(format!("{}: row {}: {e}", path.display(), i + 1)))?;
        let edge = EdgeRecord {
            source_name: row.source_name.trim().to_string(),
            target_name: row.target_name.trim().to_string(),
            relation: row.relation.trim().to_string(),
        };
        if edge.source_name.is_empty() || edge.target_name.is_empty() || edge.relation.is_empty() {
            continue;
        }
        if seen.insert(edge.clone()) {
            edges.push(edge);
        }
    }
    Ok(Some(edges))
}

fn open(path: &Path) -> Result<Option<csv::Reader<std::fs::File>>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map(Some)
        .map_err(|e| AppError::Ingest(format!("{}: {e}", path.display())))
}

/// Load both files into `store`. Missing files are reported and skipped.
pub async fn ingest(store: &GraphStore, nodes: &Path, edges: &Path) -> Result<IngestReport, AppError> {
    let mut report = IngestReport::default();
    let store_err = |e: crate::graph::StoreError| AppError::Ingest(e.to_string());

    store.ensure_entity_constraint().await.map_err(store_err)?;

    match read_nodes(nodes)? {
        Some(names) => {
            report.nodes_read = names.len();
            store.merge_entities(&names).await.map_err(store_err)?;
            info!(count = names.len(), file = %nodes.display(), "nodes merged");
        }
        None => {
            warn!(file = %nodes.display(), "nodes file not found, skipping");
            report.missing_files.push(nodes.display().to_string());
        }
    }

    match read_edges(edges)? {
        Some(list) => {
            report.edges_read = list.len();
            report.relations_linked = store.merge_relations(&list).await.map_err(store_err)?;
            if report.relations_linked < list.len() {
                warn!(
                    unmatched = list.len() - report.relations_linked,
                    "edges reference unknown entities"
                );
            }
            info!(count = report.relations_linked, file = %edges.display(), "relations merged");
        }
        None => {
            warn!(file = %edges.display(), "edges file not found, skipping");
            report.missing_files.push(edges.display().to_string());
        }
    }

    report.counts = store.counts().await.map_err(store_err)?;
    Ok(report)
}
