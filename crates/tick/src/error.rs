//! Error types for the tick engine.

use thiserror::Error;

/// Errors produced by host capabilities and engine plumbing.
///
/// None of these reach callers of the public engine operations: the engine
/// degrades the affected metric instead.
#[derive(Debug, Error)]
pub enum TickError {
    /// The host does not provide the named capability
    #[error("Capability unavailable: {0}")]
    Unsupported(String),

    /// The mark/measure recorder rejected a request
    #[error("Span recorder error: {0}")]
    Span(String),

    /// Key-value persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The overlay mount point failed
    #[error("Surface error: {0}")]
    Surface(String),

    /// The background aggregation worker failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for tick operations.
pub type TickResult<T> = Result<T, TickError>;
