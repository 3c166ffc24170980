// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A persisted shard line could not be parsed
    #[error("Corrupt shard {}: line {line}: {message}", path.display())]
    CorruptShard {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Fetching a listing page or a detail record failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A record turned resolved but its activity log carried no resolution date
    #[error("Resolution date missing for resolved record {identity}")]
    ResolutionDateMissing { identity: String },

    /// Free disk space stayed below the floor after a forced flush
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a corrupt shard error for a 1-based line number.
    pub fn corrupt_shard(path: impl Into<PathBuf>, line: usize, message: impl fmt::Display) -> Self {
        Self::CorruptShard {
            path: path.into(),
            line,
            message: message.to_string(),
        }
    }
}

/// Failure classes reported by a record fetcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx and 429 responses
    #[error("transient fetch error for {url}: {message}")]
    Transient { url: String, message: String },

    /// The page no longer exists
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The page was fetched but an expected structure was missing
    #[error("parse error for {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transient {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    pub fn parse(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify a `reqwest` error for the given URL.
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => Self::not_found(url),
            Some(status)
                if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS =>
            {
                Self::transient(url, error)
            }
            Some(_) => Self::parse(url, error),
            None if error.is_decode() => Self::parse(url, error),
            None => Self::transient(url, error),
        }
    }
}
