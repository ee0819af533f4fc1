//! Error types for future-viewings.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Input rejected at the API boundary. Nothing is persisted or enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field {field} is required")]
    Required { field: &'static str },

    #[error("Field {field} is too long: {length} > {max} characters")]
    TooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("Field {field} is out of range: {value} not in {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Image generation provider errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Image generator is not configured: {0}")]
    NotConfigured(String),

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rejected the prompt: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Generation cancelled")]
    Cancelled,
}

/// Artifact sink errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact write cancelled")]
    Cancelled,

    #[error("Empty artifact for {0}")]
    Empty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job queue errors. Handled where they occur; never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Job queue is closed")]
    Closed,

    #[error("Dequeue cancelled")]
    Cancelled,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
