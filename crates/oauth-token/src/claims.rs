//! Compact token claim decoding and expiration analysis
//!
//! Access tokens are treated as opaque three-segment compact tokens
//! (`header.payload.signature`). Only the payload is decoded; the signature is
//! never verified here. The resource server is the authority on validity,
//! claims are only used to predict staleness and for diagnostics.
//!
//! A token whose claims cannot be decoded, or that carries no `exp`, has an
//! *unknown* expiration and is reported as not expired. Only an absent token
//! is reported as expired without looking at claims.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::unix_now;

/// URL-safe base64 that accepts the payload with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a token's claims could not be decoded. Never surfaced past `decode`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("expected 3 segments, got {0}")]
    SegmentCount(usize),

    #[error("payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Decoded payload of a compact token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    claims: Map<String, Value>,
}

impl TokenClaims {
    /// Expiry, seconds since the epoch.
    pub fn exp(&self) -> Option<i64> {
        self.numeric("exp")
    }

    /// Issued-at, seconds since the epoch.
    pub fn iat(&self) -> Option<i64> {
        self.numeric("iat")
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Integer claims may arrive as floats from some issuers; fractional
    /// seconds are truncated.
    fn numeric(&self, name: &str) -> Option<i64> {
        let value = self.claims.get(name)?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }
}

/// Expiration facts derived from a token and the current time.
///
/// All optional fields are `None` when the expiration is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpirationInfo {
    pub is_expired: bool,
    pub expires_at: Option<i64>,
    /// Total lifetime granted at issue (`exp - iat`).
    pub expires_in: Option<i64>,
    pub remaining_seconds: Option<i64>,
}

impl ExpirationInfo {
    fn absent() -> Self {
        Self {
            is_expired: true,
            expires_at: None,
            expires_in: None,
            remaining_seconds: None,
        }
    }

    fn unknown() -> Self {
        Self {
            is_expired: false,
            expires_at: None,
            expires_in: None,
            remaining_seconds: None,
        }
    }

    /// Whether the claims carried an `exp`.
    pub fn is_known(&self) -> bool {
        self.expires_at.is_some()
    }
}

/// Decode the claims of a compact token, reporting why decoding failed.
pub fn try_decode(token: &str) -> Result<TokenClaims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    let bytes = URL_SAFE_LENIENT.decode(segments[1])?;
    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(claims) => Ok(TokenClaims { claims }),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode the claims of a compact token. Malformed tokens yield `None`.
pub fn decode(token: &str) -> Option<TokenClaims> {
    match try_decode(token) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "token claims could not be decoded");
            None
        }
    }
}

/// Expiration facts for `token` against the current wall clock.
pub fn expiration_info(token: Option<&str>) -> ExpirationInfo {
    expiration_info_at(token, unix_now())
}

/// Expiration facts for `token` evaluated at `now` (unix seconds).
pub fn expiration_info_at(token: Option<&str>, now: i64) -> ExpirationInfo {
    let Some(token) = token else {
        return ExpirationInfo::absent();
    };

    let Some(claims) = decode(token) else {
        return ExpirationInfo::unknown();
    };
    let Some(exp) = claims.exp() else {
        return ExpirationInfo::unknown();
    };

    // Saturated so the sign holds at the i64 extremes
    let remaining = exp.saturating_sub(now);
    ExpirationInfo {
        is_expired: remaining <= 0,
        expires_at: Some(exp),
        expires_in: exp.checked_sub(claims.iat().unwrap_or(exp)),
        remaining_seconds: Some(remaining),
    }
}
