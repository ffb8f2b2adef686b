//! Failure classification for resource server responses
//!
//! Distinguishes an expired access token from every other failure. A 401 is
//! always treated as expiry. Some authorization servers report an expired
//! token as a 400 instead, so 400 bodies are inspected for the OAuth error
//! fields that indicate expiry. Only `TokenExpired` triggers a refresh;
//! everything else passes through to the caller untouched.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;
use transport::{ApiResponse, TransportError};

/// Error body of a failed response, normalized once at classification time.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    Raw(String),
    Structured(Value),
}

impl ErrorPayload {
    /// Parse a response body. Empty bodies have no payload.
    pub fn from_body(body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }
        Some(match serde_json::from_str::<Value>(body) {
            Ok(value) => ErrorPayload::Structured(value),
            Err(_) => ErrorPayload::Raw(body.to_string()),
        })
    }

    /// The payload as structured data, parsing raw text if it happens to be
    /// JSON. Opaque text yields `None`.
    pub fn structured(&self) -> Option<Cow<'_, Value>> {
        match self {
            ErrorPayload::Structured(value) => Some(Cow::Borrowed(value)),
            ErrorPayload::Raw(text) => serde_json::from_str(text).ok().map(Cow::Owned),
        }
    }

    /// Whether the body carries one of the OAuth expired-token indicators.
    pub fn indicates_expired_token(&self) -> bool {
        let Some(data) = self.structured() else {
            return false;
        };
        let field = |name: &str| data.get(name).and_then(Value::as_str);

        field("error") == Some("invalid_token")
            || field("error_reason") == Some("access_token_expired")
            || field("error_description")
                .is_some_and(|d| d.to_lowercase().contains("expired"))
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPayload::Raw(text) => f.write_str(text),
            ErrorPayload::Structured(value) => write!(f, "{value}"),
        }
    }
}

/// Category of a failed request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifiedError {
    #[error("access token expired")]
    TokenExpired,

    #[error(
        "client error {0}{suffix}",
        suffix = .1.as_ref().map(|p| format!(": {p}")).unwrap_or_default()
    )]
    ClientError(u16, Option<ErrorPayload>),

    #[error("server error {0}")]
    ServerError(u16),

    #[error("network error: {0}")]
    NetworkError(TransportError),
}

impl ClassifiedError {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedError::TokenExpired => "token_expired",
            ClassifiedError::ClientError(..) => "client_error",
            ClassifiedError::ServerError(_) => "server_error",
            ClassifiedError::NetworkError(_) => "network_error",
        }
    }
}

/// Classify a failed response by status and body.
///
/// Rules, in order: 401 is expiry; 400 is expiry if the body says so,
/// otherwise a client error; other 4xx are client errors; 5xx are server
/// errors. Any other non-success status is treated as a server error.
pub fn classify_status(status: u16, payload: Option<ErrorPayload>) -> ClassifiedError {
    match status {
        401 => ClassifiedError::TokenExpired,
        400 => {
            if payload
                .as_ref()
                .is_some_and(ErrorPayload::indicates_expired_token)
            {
                ClassifiedError::TokenExpired
            } else {
                ClassifiedError::ClientError(400, payload)
            }
        }
        402..=499 => ClassifiedError::ClientError(status, payload),
        _ => ClassifiedError::ServerError(status),
    }
}

/// Classify a non-success response.
pub fn classify_response(response: &ApiResponse) -> ClassifiedError {
    classify_status(response.status, ErrorPayload::from_body(&response.text()))
}

/// Classify a request that produced no response.
pub fn classify_transport(error: TransportError) -> ClassifiedError {
    ClassifiedError::NetworkError(error)
}
