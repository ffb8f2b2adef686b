//! OAuth2 bearer token primitives
//!
//! Claim decoding, credential storage, and the token endpoint calls used by
//! the session layer. This crate has no notion of session state or request
//! retry; `auth-session` builds those on top.
//!
//! Credential flow:
//! 1. Login stores a `TokenResponse` via `credentials::CredentialStore::set()`
//! 2. `claims::expiration_info()` reports whether the stored access token is stale
//! 3. `token::refresh_token()` exchanges the refresh token for a new pair
//! 4. `token::revoke_token()` invalidates the access token on logout

pub mod claims;
pub mod config;
pub mod credentials;
pub mod error;
pub mod token;

pub use claims::{DecodeError, ExpirationInfo, TokenClaims, decode, expiration_info};
pub use config::ClientConfig;
pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, SecretName,
};
pub use error::{Error, Result};
pub use token::{TokenResponse, refresh_token, revoke_token};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
