//! Error types for each pipeline boundary.
//!
//! Only [`SetupError`] ever leaves the orchestrator; the others are logged
//! where they happen and turned into counters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store not initialized: {0}")]
    NotInitialized(String),

    #[error("Unsupported conflict key: {0}")]
    UnsupportedConflictKey(String),
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unreachable: {0}")]
    Unreachable(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
#[error("Batch {batch} ({size} records) failed: {source}")]
pub struct WriteError {
    pub batch: usize,
    pub size: usize,
    #[source]
    pub source: StoreError,
}
