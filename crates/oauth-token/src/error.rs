//! Error types for token endpoint and credential store operations

/// Errors from OAuth token operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;
