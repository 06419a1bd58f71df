//! Auth error types.

/// Errors that can occur talking to the auth platform.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform rejected the request.
    #[error("auth platform error ({status}): {message}")]
    Platform {
        /// HTTP status code (0 if no response).
        status: u16,
        /// Error description.
        message: String,
    },

    /// No session is held and the operation needs one.
    #[error("not authenticated")]
    NotAuthenticated,
}
