//! OAuth token refresh and revocation
//!
//! Handles the two authorization-server interactions the session layer makes:
//! 1. Token refresh (`grant_type=refresh_token`) against the token endpoint
//! 2. Token revocation (RFC 7009) against the revocation endpoint on logout
//!
//! Both are form-encoded POSTs. The authorization-code exchange is owned by the
//! external login flow and is not implemented here.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `refresh_token` is present only when the server rotates it. `expires_in`
/// is a delta in seconds from the response time.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Exchange a refresh token for a new credential pair.
///
/// Non-2xx responses are `Error::Rejected` carrying the status and body; a
/// transport failure is `Error::Http`; a 2xx body without `access_token` is
/// `Error::InvalidResponse`.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &ClientConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", config.client_id.as_str()),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    debug!(endpoint = %config.token_endpoint, "requesting token refresh");

    let response = client
        .post(&config.token_endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("invalid refresh response: {e}")))
}

/// Revoke a token at the configured revocation endpoint.
///
/// Returns `Error::NotConfigured` when no revocation endpoint is set.
pub async fn revoke_token(
    client: &reqwest::Client,
    config: &ClientConfig,
    token: &str,
) -> Result<()> {
    let endpoint = config
        .revocation_endpoint
        .as_deref()
        .ok_or_else(|| Error::NotConfigured("revocation_endpoint".into()))?;

    let response = client
        .post(endpoint)
        .form(&[("token", token), ("client_id", config.client_id.as_str())])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token revocation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        warn!(status = status.as_u16(), "token revocation rejected");
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    debug!("token revoked");
    Ok(())
}
