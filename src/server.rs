//! JSON HTTP API over the pipeline.
//!
//! ```text
//! GET  /_health     → {"status":"ok"}
//! GET  /api/schema  → schema of the configured graph store
//! POST /api/query   → {"answer", "cypher"} for {"question"}
//! ```
//!
//! Unless a store is injected with [`AppState::with_store`], every request
//! opens its own store connection; concurrent questions share only the
//! immutable config and provider.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::graph::GraphStore;
use crate::llm::LlmProvider;
use crate::pipeline::{self, PipelineOutcome};

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: LlmProvider,
    /// When set, used instead of connecting per request.
    pub store: Option<GraphStore>,
}

impl AppState {
    pub fn new(config: Config, provider: LlmProvider) -> Self {
        Self { config: Arc::new(config), provider, store: None }
    }

    /// Serve every request from `store`.
    pub fn with_store(mut self, store: GraphStore) -> Self {
        self.store = Some(store);
        self
    }
}

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: String,
}

fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// GET /_health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/schema
async fn schema(State(state): State<AppState>) -> Response {
    let store = match &state.store {
        Some(store) => store.clone(),
        None => match GraphStore::connect(&state.config.graph).await {
            Ok(store) => store,
            Err(e) => {
                warn!("schema request: {e}");
                return (StatusCode::BAD_GATEWAY, json_error("graph_unavailable", e)).into_response();
            }
        },
    };
    match store.fetch_schema().await {
        Ok(schema) => (StatusCode::OK, Json(schema)).into_response(),
        Err(e) => {
            warn!("schema fetch failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("schema_fetch", e)).into_response()
        }
    }
}

/// POST /api/query. 200 for every pipeline outcome, 400 for a blank question.
async fn query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    let question = req.question.trim();
    if question.is_empty() {
        return (StatusCode::BAD_REQUEST, json_error("bad_request", "question is required")).into_response();
    }

    let outcome: PipelineOutcome = match &state.store {
        Some(store) => {
            pipeline::Pipeline::new(store.clone(), state.provider.clone(), state.config.query.clone())
                .run(question)
                .await
        }
        None => pipeline::ask(&state.config, &state.provider, question).await,
    };
    (StatusCode::OK, Json(outcome)).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/_health",    get(health))
        .route("/api/schema", get(schema))
        .route("/api/query",  post(query))
        .with_state(state)
}

/// Bind `state.config.server.bind` and serve until `shutdown` fires.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    let bind_addr = state.config.server.bind.clone();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "http api listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("server error: {e}")))?;

    info!("http api shut down");
    Ok(())
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            token.cancel();
        }
    });
}
