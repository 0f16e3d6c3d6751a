//! Error types for session operations

/// Errors from session storage and token refresh.
///
/// `Clone` so a single refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh token rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
