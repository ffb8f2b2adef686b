//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is resolved from OAUTH_CLIENT_SECRET, then
//! client_secret_file, then the inline TOML value.

use common::Secret;
use oauth_token::ClientConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Authorization server endpoints and client registration
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    pub userinfo_endpoint: String,
    pub client_id: String,
    /// Inline secret. Prefer OAUTH_CLIENT_SECRET or `client_secret_file`.
    #[serde(default, rename = "client_secret")]
    inline_client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

/// Credential persistence
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Outbound HTTP settings
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_timeout() -> u64 {
    30
}

fn require_http_url(name: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("token_endpoint", &config.oauth.token_endpoint)?;
        require_http_url("userinfo_endpoint", &config.oauth.userinfo_endpoint)?;
        if let Some(endpoint) = &config.oauth.revocation_endpoint {
            require_http_url("revocation_endpoint", endpoint)?;
        }

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if config.http.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        config.oauth.client_secret = config.oauth.resolve_client_secret()?;
        Ok(config)
    }
}

impl OAuthConfig {
    fn resolve_client_secret(&mut self) -> common::Result<Option<Secret<String>>> {
        let inline = self.inline_client_secret.take();

        if let Ok(secret) = std::env::var("OAUTH_CLIENT_SECRET") {
            return Ok(Some(Secret::new(secret)));
        }

        if let Some(ref secret_file) = self.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            return Ok((!secret.is_empty()).then(|| Secret::new(secret)));
        }

        Ok(inline.filter(|s| !s.is_empty()).map(Secret::new))
    }

    /// Client registration for token endpoint calls.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new(&self.token_endpoint, &self.client_id);
        if let Some(secret) = &self.client_secret {
            client = client.with_client_secret(secret.clone());
        }
        if let Some(endpoint) = &self.revocation_endpoint {
            client = client.with_revocation_endpoint(endpoint);
        }
        client
    }
}
