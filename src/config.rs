//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (optional; built-in defaults apply when it is absent), then applies the
//! `NEO4J_*`, `GRAPHQA_LOG_LEVEL` and `LLM_API_KEY` env overrides.
//!
//! API keys are only ever sourced from the environment (or `.env`), never
//! from TOML.

use std::{
    env, fs,
    path::Path,
};

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature. Query generation relies on `0.0`.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Optional cap on completion tokens.
    pub max_tokens: Option<u32>,
    /// How many times an HTTP 429 is retried before giving up.
    pub max_retries: u32,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active. Maps to `default` in `[llm]`.
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Graph store connection (`[graph]`).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Base URL of the Neo4j HTTP endpoint, e.g. `http://localhost:7474`.
    pub uri: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub timeout_seconds: u64,
    /// Rows per `UNWIND` batch during ingestion.
    pub batch_size: usize,
    /// Upper bound on relationship patterns sampled into the schema.
    pub pattern_sample: usize,
}

/// Query generation policy (`[query]`).
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Reject queries that use labels or relationship types absent from the schema.
    pub enforce_schema: bool,
    /// Reject (instead of warn on) exact equality against name-like properties.
    pub strict_name_matching: bool,
    /// Reject write and admin clauses.
    pub read_only: bool,
    /// Appended as `LIMIT n` when the generated query has none.
    pub default_limit: Option<usize>,
    /// Extra generation rounds after a failed execution. `0` disables repair.
    pub repair_attempts: u32,
    /// Rows handed to answer synthesis.
    pub max_context_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let q = RawQuery::default();
        Self {
            enforce_schema: q.enforce_schema,
            strict_name_matching: q.strict_name_matching,
            read_only: q.read_only,
            default_limit: q.default_limit,
            repair_attempts: q.repair_attempts,
            max_context_rows: q.max_context_rows,
        }
    }
}

/// HTTP API configuration (`[server]`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub query: QueryConfig,
    pub server: ServerConfig,
    /// From `LLM_API_KEY` (fallback `GROQ_API_KEY`). Never sourced from TOML.
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Return the API key, rejecting absent or placeholder values.
    ///
    /// Called before any network traffic so that a misconfigured process
    /// fails fast instead of failing every run.
    pub fn require_api_key(&self) -> Result<&str, AppError> {
        let key = self
            .llm_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Config("missing LLM_API_KEY in environment or .env file".into()))?;
        if is_placeholder_key(key) {
            return Err(AppError::Config(format!(
                "invalid API key: '{key}' looks like a placeholder, replace it with a real key"
            )));
        }
        Ok(key)
    }
}

/// Values taken from the environment. Tests build this directly instead of
/// mutating process env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub graph_uri: Option<String>,
    pub graph_database: Option<String>,
    pub graph_user: Option<String>,
    pub graph_password: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("GRAPHQA_LOG_LEVEL").ok(),
            graph_uri: env::var("NEO4J_URI").ok(),
            graph_database: env::var("NEO4J_DATABASE").ok(),
            graph_user: env::var("NEO4J_USER").ok(),
            graph_password: env::var("NEO4J_PASSWORD").ok(),
            llm_api_key: env::var("LLM_API_KEY")
                .ok()
                .or_else(|| env::var("GROQ_API_KEY").ok()),
        }
    }
}

const PLACEHOLDER_PREFIXES: &[&str] = &["your_", "your-", "<", "sk-...", "replace", "insert"];
const PLACEHOLDER_VALUES: &[&str] = &["changeme", "change-me", "placeholder", "xxx", "todo", "none", "null"];

/// `true` for values that were obviously never filled in, e.g.
/// `YOUR_GROQ_API_KEY_HERE` or `<api-key>`.
pub fn is_placeholder_key(key: &str) -> bool {
    let lower = key.trim().to_ascii_lowercase();
    PLACEHOLDER_PREFIXES.iter().any(|p| lower.starts_with(p))
        || PLACEHOLDER_VALUES.contains(&lower.as_str())
        || lower.chars().all(|c| c == 'x' || c == '*' || c == '.')
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    graph: RawGraph,
    #[serde(default)]
    query: RawQuery,
    #[serde(default)]
    server: RawServer,
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default)]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    max_retries: u32,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: 0.0,
            timeout_seconds: default_openai_timeout_seconds(),
            max_tokens: None,
            max_retries: 0,
        }
    }
}

#[derive(Deserialize)]
struct RawGraph {
    #[serde(default = "default_graph_uri")]
    uri: String,
    #[serde(default = "default_graph_database")]
    database: String,
    #[serde(default = "default_graph_user")]
    user: String,
    #[serde(default = "default_graph_password")]
    password: String,
    #[serde(default = "default_graph_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_pattern_sample")]
    pattern_sample: usize,
}

impl Default for RawGraph {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            database: default_graph_database(),
            user: default_graph_user(),
            password: default_graph_password(),
            timeout_seconds: default_graph_timeout_seconds(),
            batch_size: default_batch_size(),
            pattern_sample: default_pattern_sample(),
        }
    }
}

#[derive(Deserialize)]
struct RawQuery {
    #[serde(default = "default_true")]
    enforce_schema: bool,
    #[serde(default)]
    strict_name_matching: bool,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    default_limit: Option<usize>,
    #[serde(default)]
    repair_attempts: u32,
    #[serde(default = "default_max_context_rows")]
    max_context_rows: usize,
}

impl Default for RawQuery {
    fn default() -> Self {
        Self {
            enforce_schema: true,
            strict_name_matching: false,
            read_only: false,
            default_limit: None,
            repair_attempts: 0,
            max_context_rows: default_max_context_rows(),
        }
    }
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_server_bind")]
    bind: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_server_bind() }
    }
}

fn default_llm_provider() -> String { "groq".to_string() }
fn default_openai_api_base_url() -> String { "https://api.groq.com/openai/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "llama-3.3-70b-versatile".to_string() }
fn default_openai_timeout_seconds() -> u64 { 120 }
fn default_graph_uri() -> String { "http://localhost:7474".to_string() }
fn default_graph_database() -> String { "neo4j".to_string() }
fn default_graph_user() -> String { "neo4j".to_string() }
fn default_graph_password() -> String { "password123".to_string() }
fn default_graph_timeout_seconds() -> u64 { 30 }
fn default_batch_size() -> usize { 500 }
fn default_pattern_sample() -> usize { 100 }
fn default_max_context_rows() -> usize { 10 }
fn default_server_bind() -> String { "127.0.0.1:3001".to_string() }
fn default_log_level() -> String { "warn".to_string() }

fn default_true() -> bool {
    true
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config, then apply env-var overrides.
///
/// An explicit `path` must exist. Without one, `config/default.toml` is read
/// when present and built-in defaults are used otherwise.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    match path {
        Some(path) => load_from(path, &overrides),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_from(default_path, &overrides)
            } else {
                from_toml_str("", &overrides)
            }
        }
    }
}

/// Load `path` with explicit overrides instead of the process environment.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    from_toml_str(&raw, overrides).map_err(|e| match e {
        AppError::Config(msg) => AppError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Resolve a TOML document plus overrides into a [`Config`].
pub fn from_toml_str(raw: &str, overrides: &Overrides) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;

    if parsed.graph.batch_size == 0 {
        return Err(AppError::Config("graph.batch_size must be at least 1".into()));
    }

    let log_level = overrides
        .log_level
        .clone()
        .or(parsed.log_level)
        .unwrap_or_else(default_log_level);

    let g = parsed.graph;
    let o = parsed.llm.openai;
    let q = parsed.query;

    Ok(Config {
        log_level,
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: o.api_base_url,
                model: o.model,
                temperature: o.temperature,
                timeout_seconds: o.timeout_seconds,
                max_tokens: o.max_tokens,
                max_retries: o.max_retries,
            },
        },
        graph: GraphConfig {
            uri: overrides.graph_uri.clone().unwrap_or(g.uri),
            database: overrides.graph_database.clone().unwrap_or(g.database),
            user: overrides.graph_user.clone().unwrap_or(g.user),
            password: overrides.graph_password.clone().unwrap_or(g.password),
            timeout_seconds: g.timeout_seconds,
            batch_size: g.batch_size,
            pattern_sample: g.pattern_sample,
        },
        query: QueryConfig {
            enforce_schema: q.enforce_schema,
            strict_name_matching: q.strict_name_matching,
            read_only: q.read_only,
            default_limit: q.default_limit,
            repair_attempts: q.repair_attempts,
            max_context_rows: q.max_context_rows,
        },
        server: ServerConfig { bind: parsed.server.bind },
        llm_api_key: overrides.llm_api_key.clone(),
    })
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Safe `Config` for tests: local endpoints, no API key.
    pub fn test_default() -> Self {
        Self {
            log_level: "info".into(),
            llm: LlmConfig {
                provider: "openai".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                    max_tokens: None,
                    max_retries: 0,
                },
            },
            graph: GraphConfig {
                uri: "http://localhost:0".into(),
                database: "neo4j".into(),
                user: "neo4j".into(),
                password: "test".into(),
                timeout_seconds: 1,
                batch_size: default_batch_size(),
                pattern_sample: default_pattern_sample(),
            },
            query: QueryConfig::default(),
            server: ServerConfig { bind: "127.0.0.1:0".into() },
            llm_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = from_toml_str("", &Overrides::default()).unwrap();
        assert_eq!(cfg.llm.provider, "groq");
        assert_eq!(cfg.llm.openai.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm.openai.temperature, 0.0);
        assert_eq!(cfg.llm.openai.max_retries, 0);
        assert_eq!(cfg.graph.uri, "http://localhost:7474");
        assert_eq!(cfg.graph.database, "neo4j");
        assert!(cfg.query.enforce_schema);
        assert_eq!(cfg.query.repair_attempts, 0);
        assert_eq!(cfg.query.max_context_rows, 10);
        assert_eq!(cfg.log_level, "warn");
        assert!(cfg.llm_api_key.is_none());
    }

    #[test]
    fn parse_full_config() {
        let f = write_toml(
            r#"
log_level = "debug"

[llm]
default = "openai"

[llm.openai]
api_base_url = "http://127.0.0.1:8081/v1/chat/completions"
model = "gpt-4o-mini"
max_retries = 3

[graph]
uri = "http://graph:7474"
user = "reader"
batch_size = 50

[query]
read_only = true
default_limit = 25
repair_attempts = 1
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.openai.max_retries, 3);
        assert_eq!(cfg.graph.uri, "http://graph:7474");
        assert_eq!(cfg.graph.user, "reader");
        assert_eq!(cfg.graph.password, "password123");
        assert_eq!(cfg.graph.batch_size, 50);
        assert!(cfg.query.read_only);
        assert_eq!(cfg.query.default_limit, Some(25));
        assert_eq!(cfg.query.repair_attempts, 1);
    }

    #[test]
    fn overrides_win_over_file() {
        let f = write_toml("[graph]\nuri = \"http://from-file:7474\"\n");
        let overrides = Overrides {
            log_level: Some("trace".into()),
            graph_uri: Some("http://from-env:7474".into()),
            graph_password: Some("s3cret".into()),
            llm_api_key: Some("gsk_live_key".into()),
            ..Overrides::default()
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.log_level, "trace");
        assert_eq!(cfg.graph.uri, "http://from-env:7474");
        assert_eq!(cfg.graph.password, "s3cret");
        assert_eq!(cfg.llm_api_key.as_deref(), Some("gsk_live_key"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn malformed_toml_errors() {
        let err = from_toml_str("[graph\nuri=", &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = from_toml_str("[graph]\nbatch_size = 0\n", &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn api_key_required() {
        let cfg = Config::test_default();
        let err = cfg.require_api_key().unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }

    #[test]
    fn blank_api_key_rejected() {
        let mut cfg = Config::test_default();
        cfg.llm_api_key = Some("   ".into());
        assert!(cfg.require_api_key().is_err());
    }

    #[test]
    fn placeholder_api_key_rejected() {
        let mut cfg = Config::test_default();
        cfg.llm_api_key = Some("YOUR_GROQ_API_KEY_HERE".into());
        let err = cfg.require_api_key().unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn real_api_key_accepted() {
        let mut cfg = Config::test_default();
        cfg.llm_api_key = Some(" gsk_abc123 ".into());
        assert_eq!(cfg.require_api_key().unwrap(), "gsk_abc123");
    }

    #[test]
    fn placeholder_detection() {
        for key in ["YOUR_API_KEY", "your-api-key-here", "<api-key>", "changeme", "xxxxxxxx", "sk-..."] {
            assert!(is_placeholder_key(key), "expected '{key}' to be a placeholder");
        }
        for key in ["gsk_8f3Kq", "sk-proj-abc123", "abc"] {
            assert!(!is_placeholder_key(key), "expected '{key}' to be accepted");
        }
    }
}
