//! Error types for the evaluation engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while scoring, storing or validating results.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A benchmark run file exists but cannot be parsed.
    #[error("Benchmark store corrupted at '{path}': {reason}")]
    StoreCorruption { path: PathBuf, reason: String },

    /// Run ids become file names, so they must be plain stems.
    #[error("Invalid run id '{0}': use letters, digits, '-' or '_'")]
    InvalidRunId(String),

    /// A metric value that cannot be stored (NaN or infinite).
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    /// A query or comparison filter was malformed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Mode name not present in the registry.
    #[error("Unknown mode '{0}'. Available: basic, assistant, deep, both")]
    UnknownMode(String),

    /// Validation item id was never added to the session.
    #[error("Unknown validation item {0}")]
    UnknownItem(u32),

    /// `best_mode` names a mode the item does not carry.
    #[error("Invalid mode selection '{mode}' for item {item_id}")]
    InvalidModeSelection { item_id: u32, mode: String },

    /// Rating outside the 1..=5 scale.
    #[error("Invalid rating {0}: expected 1-5")]
    InvalidRating(u8),

    /// Validation item payload is not usable.
    #[error("Invalid validation item: {0}")]
    InvalidItem(String),

    /// Session ids name the snapshot file, like run ids.
    #[error("Invalid session id '{0}': use letters, digits, '-' or '_'")]
    InvalidSessionId(String),

    /// The scorer requires a non-empty answer.
    #[error("Answer must not be empty")]
    EmptyAnswer,

    /// LLM judge unreachable or returned an unusable metric. Never leaves
    /// the scorer; it triggers the lexical fallback instead.
    #[error("Scorer unavailable: {0}")]
    ScorerUnavailable(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a corruption error for a run file.
    pub fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StoreCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::LlmParse(err.to_string())
    }
}
