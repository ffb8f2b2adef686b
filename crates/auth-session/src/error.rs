//! Error types for session operations

use crate::classify::ClassifiedError;

/// Terminal refresh failures. Every variant forces a logout.
///
/// `Clone` because one failure is delivered to every caller waiting on the
/// same refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh token rejected ({status}): {body}")]
    RefreshRejected { status: u16, body: String },

    #[error("token endpoint unreachable: {0}")]
    NetworkFailure(String),
}

impl RefreshError {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshError::NoRefreshToken => "no_refresh_token",
            RefreshError::RefreshRejected { .. } => "rejected",
            RefreshError::NetworkFailure(_) => "network_failure",
        }
    }
}

/// Outcome of an authenticated request that did not succeed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// The request failed for a reason the session layer does not handle,
    /// or failed again after a refresh.
    #[error(transparent)]
    Passthrough(ClassifiedError),

    /// The access token expired and the session could not be renewed; the
    /// session has been terminated.
    #[error("session terminated: {0}")]
    AuthError(RefreshError),
}

/// Errors from login/restore/logout.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential store error: {0}")]
    Credential(#[from] oauth_token::Error),

    #[error("login response carried an empty access token")]
    EmptyAccessToken,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
