//! Command execution against a configured session

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use auth_session::{
    RequestExecutor, Session, SessionManager, SessionState, UserInfoError, fetch_user_info,
};
use oauth_token::{FileCredentialStore, SecretName, TokenResponse, claims};
use serde_json::{Value, json};
use tracing::{info, warn};
use transport::ReqwestTransport;

use crate::cli::Command;
use crate::config::Config;

pub struct App {
    manager: SessionManager,
    executor: RequestExecutor,
    userinfo_endpoint: String,
}

impl App {
    /// Open the credential store and wire the session stack from `config`.
    pub async fn build(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .build()
            .context("failed to build HTTP client")?;

        let store = FileCredentialStore::load(config.store.path.clone())
            .await
            .with_context(|| {
                format!(
                    "failed to open credential store {}",
                    config.store.path.display()
                )
            })?;

        let session = Arc::new(Session::new(Arc::new(|state: SessionState| {
            info!(%state, "session state changed");
        })));
        let manager = SessionManager::new(
            Arc::new(store),
            session,
            http_client.clone(),
            config.oauth.client_config(),
        );
        let executor = manager.executor(Arc::new(ReqwestTransport::new(http_client)));

        Ok(Self {
            manager,
            executor,
            userinfo_endpoint: config.oauth.userinfo_endpoint.clone(),
        })
    }

    /// Run one command and return its JSON report.
    ///
    /// `input` is read only by `login`, which expects a token endpoint
    /// response (`access_token`, optional `refresh_token` and `expires_in`).
    pub async fn run(&self, command: Command, input: impl Read) -> Result<Value> {
        match command {
            Command::Login => {
                let response: TokenResponse = serde_json::from_reader(input)
                    .context("login expects a token response as JSON on stdin")?;
                let credential = self.manager.login(&response).await?;
                let state = self.state().await;
                Ok(json!({
                    "state": state,
                    "expires_at": credential.expires_at,
                }))
            }
            Command::Restore => {
                let restored = self.manager.restore().await?;
                let state = self.state().await;
                Ok(json!({
                    "state": state,
                    "expires_at": restored.and_then(|c| c.expires_at),
                }))
            }
            Command::UserInfo => {
                self.manager.restore().await?;
                match fetch_user_info(&self.executor, &self.userinfo_endpoint).await {
                    Ok(user) => Ok(serde_json::to_value(user)?),
                    Err(UserInfoError::Request(e)) => {
                        let state = self.state().await;
                        warn!(error = %e, %state, "userinfo request failed");
                        Err(e).context("userinfo request failed")
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Command::TokenInfo => {
                let store = self.manager.store();
                let access = store.get(SecretName::AccessToken).await?;
                let refresh = store.get(SecretName::RefreshToken).await?;
                let access =
                    claims::expiration_info(access.as_ref().map(|s| s.expose().as_str()));
                let refresh =
                    claims::expiration_info(refresh.as_ref().map(|s| s.expose().as_str()));
                Ok(json!({
                    "access_token": access,
                    "refresh_token": refresh,
                }))
            }
            Command::Refresh => {
                self.manager.restore().await?;
                let credential = self
                    .manager
                    .coordinator()
                    .refresh()
                    .await
                    .context("token refresh failed")?;
                let state = self.state().await;
                Ok(json!({
                    "state": state,
                    "expires_at": credential.expires_at,
                    "has_refresh_token": credential.refresh_token.is_some(),
                }))
            }
            Command::Logout => {
                self.manager.logout().await?;
                let state = self.state().await;
                Ok(json!({ "state": state }))
            }
        }
    }

    async fn state(&self) -> SessionState {
        self.manager.session().state().await
    }
}
