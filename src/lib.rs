use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuideError>;

#[derive(Error, Debug)]
pub enum GuideError {
    /// Fatal misconfiguration: wrong embedding dimension, embedding-model
    /// drift between index and query time, missing required settings.
    /// Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient external-service failure (timeout, rate limit, 5xx).
    /// Retried at the call site; after that the surrounding component
    /// applies its own fallback.
    #[error("Service error: {0}")]
    Service(String),

    /// Model output violated the reply contract. Handled inside the
    /// orchestrator; never surfaced to the end user.
    #[error("Output contract violation: {0}")]
    OutputContract(String),

    /// Malformed request at the API boundary; surfaced as a 4xx.
    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl GuideError {
    /// Whether a failed call is worth another attempt. Configuration
    /// problems are permanent; service hiccups are not.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, GuideError::Service(_))
    }
}

pub mod catalog;
pub mod chat;
pub mod commands;
pub mod config;
pub mod crawler;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod orchestrator;
pub mod retriever;
pub mod server;
