//! OAuth client registration used for token endpoint calls

use common::Secret;

/// Endpoints and client credentials for the authorization server.
///
/// `client_secret` is optional for public clients; when absent the
/// `client_secret` form field is omitted entirely.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
}

impl ClientConfig {
    pub fn new(token_endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            revocation_endpoint: None,
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<Secret<String>>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_revocation_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.revocation_endpoint = Some(endpoint.into());
        self
    }
}
