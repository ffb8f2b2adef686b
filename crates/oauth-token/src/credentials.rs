//! Credential storage for OAuth tokens
//!
//! The store holds exactly two named secrets: the access token and the
//! refresh token. `CredentialStore` is the contract the session layer needs;
//! `FileCredentialStore` persists to a JSON file with atomic temp-file +
//! rename writes, `MemoryCredentialStore` backs tests and ephemeral sessions.
//!
//! Values never reach the logs: only secret names are recorded.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::claims;
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Names of the secrets held by a credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretName {
    #[serde(rename = "accessToken")]
    AccessToken,
    #[serde(rename = "refreshToken")]
    RefreshToken,
}

impl SecretName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretName::AccessToken => "accessToken",
            SecretName::RefreshToken => "refreshToken",
        }
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current bearer credential.
///
/// Access and refresh tokens are always replaced together; a `Credential` is
/// never patched in place. `expires_at` is unix seconds, taken from the
/// token response's `expires_in` or, failing that, the access token's `exp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub token_type: String,
    pub expires_at: Option<i64>,
}

impl Credential {
    /// Build a credential from a token endpoint response received at `now`.
    pub fn from_response(response: &TokenResponse, now: i64) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok().and_then(|s| now.checked_add(s)))
            .or_else(|| claims::decode(&response.access_token).and_then(|c| c.exp()));
        Self {
            access_token: Secret::new(response.access_token.clone()),
            refresh_token: response.refresh_token.clone().map(Secret::new),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
        }
    }

    /// Credential restored from storage, where only the raw tokens survive.
    pub fn restored(access_token: Secret<String>, refresh_token: Option<Secret<String>>) -> Self {
        let expires_at = claims::decode(access_token.expose()).and_then(|c| c.exp());
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }
}

/// Durable key-value storage for the two session secrets.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    fn get(
        &self,
        name: SecretName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Secret<String>>>> + Send + '_>>;

    fn set<'a>(
        &'a self,
        name: SecretName,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn delete(&self, name: SecretName) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// File-backed credential store.
///
/// The Mutex serializes all writes; reads hold it only long enough to clone
/// the value out of the in-memory map.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<SecretName, String>>,
}

impl FileCredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it (and its parent directory) as
    /// `{}`: a logged-out session.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let secrets: HashMap<SecretName, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), secrets = secrets.len(), "loaded credentials");
            secrets
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;
            }
            let store = HashMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(
        &self,
        name: SecretName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Secret<String>>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(&name).cloned().map(Secret::new))
        })
    }

    fn set<'a>(
        &'a self,
        name: SecretName,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(name, value.to_string());
            debug!(secret = %name, "stored secret");
            write_atomic(&self.path, &state).await
        })
    }

    fn delete(&self, name: SecretName) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remove(&name).is_some() {
                debug!(secret = %name, "deleted secret");
                write_atomic(&self.path, &state).await?;
            }
            Ok(())
        })
    }
}

/// In-memory credential store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<HashMap<SecretName, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given tokens.
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let mut state = HashMap::new();
        if let Some(access) = access {
            state.insert(SecretName::AccessToken, access.to_string());
        }
        if let Some(refresh) = refresh {
            state.insert(SecretName::RefreshToken, refresh.to_string());
        }
        Self {
            state: Mutex::new(state),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(
        &self,
        name: SecretName,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Secret<String>>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.get(&name).cloned().map(Secret::new)) })
    }

    fn set<'a>(
        &'a self,
        name: SecretName,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.state.lock().await.insert(name, value.to_string());
            Ok(())
        })
    }

    fn delete(&self, name: SecretName) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().await.remove(&name);
            Ok(())
        })
    }
}

/// Write secrets to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, data: &HashMap<SecretName, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
