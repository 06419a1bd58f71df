//! Core error types.

/// Errors from settings loading and other core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
