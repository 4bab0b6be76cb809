//! Diagnostics for the three binaries.
//!
//! Everything is written to stderr. Stdout carries exactly one JSON object
//! per run and must stay clean.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Which source wins when both a configured level and `RUST_LOG` exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// The explicit level wins; `RUST_LOG` only rescues an unparsable one.
    Explicit,
    /// `RUST_LOG` wins when it parses; the explicit level is the fallback.
    Environment,
}

/// `-v` → info, `-vv` → debug, anything more → trace. No flag means the
/// configured level applies.
pub fn level_for_verbosity(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Build the filter without installing anything.
pub fn filter(level: &str, precedence: Precedence) -> Result<EnvFilter, AppError> {
    let explicit = || EnvFilter::try_new(level).map_err(|e| e.to_string());
    let environment = || EnvFilter::try_from_default_env().map_err(|e| e.to_string());
    let chosen = match precedence {
        Precedence::Explicit => explicit().or_else(|_| environment()),
        Precedence::Environment => environment().or_else(|_| explicit()),
    };
    chosen.map_err(|e| AppError::Logger(format!("cannot use log level {level:?}: {e}")))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(level: &str, precedence: Precedence) -> Result<(), AppError> {
    let filter = filter(level, precedence)?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| AppError::Logger(format!("subscriber already installed: {e}")))
}
