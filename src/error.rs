//! Error taxonomy for the ingestion pipeline.
//!
//! Library code returns these typed errors; the binary wraps them with
//! `anyhow` for reporting. Only [`FetchError`] and [`RepositoryError`] can
//! abort an ingestion call. [`SummarizationError`] degrades a single record.

use std::path::PathBuf;

use crate::models::{truncate_chars, Source};

/// Source adapter failure; fatal to one ingestion call
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("failed to parse listing: {0}")]
    Parse(String),

    #[error("publisher API error: {0}")]
    Api(String),
}

/// Summarizer failure, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummarizationError {
    /// Timeout, rate limit or server-side fault; worth retrying
    #[error("transient summarization failure: {0}")]
    Transient(String),

    /// Malformed input, auth failure or unusable response; never retried
    #[error("permanent summarization failure: {0}")]
    Permanent(String),
}

impl SummarizationError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status returned by a summarization endpoint
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("status {status}: {}", truncate_chars(body, 200));
        match status {
            408 | 429 | 500..=599 => Self::Transient(msg),
            _ => Self::Permanent(msg),
        }
    }
}

impl From<reqwest::Error> for SummarizationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return Self::Transient(err.to_string());
        }
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), ""),
            None if err.is_decode() => Self::Permanent(err.to_string()),
            None => Self::Transient(err.to_string()),
        }
    }
}

/// Storage-layer fault; fatal and propagated
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a whole ingestion call
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("no source adapter registered for {0}")]
    UnknownSource(Source),

    #[error("fetch from {source_id} failed: {error}")]
    Fetch {
        source_id: Source,
        #[source]
        error: FetchError,
    },

    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error("article worker failed: {0}")]
    Worker(String),
}
