//! Login, restore and logout
//!
//! `SessionManager` owns the pieces every session operation touches (store,
//! session, HTTP client, client config) and hands out the refresh
//! coordinator and request executor built on the same instances.

use std::sync::Arc;

use oauth_token::{
    ClientConfig, Credential, CredentialStore, SecretName, TokenResponse, revoke_token, unix_now,
};
use tracing::{debug, info, warn};
use transport::Transport;

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::session::{Session, SessionEvent, SessionState};

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    session: Arc<Session>,
    http_client: reqwest::Client,
    client_config: ClientConfig,
    coordinator: RefreshCoordinator,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        session: Arc<Session>,
        http_client: reqwest::Client,
        client_config: ClientConfig,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            session.clone(),
            http_client.clone(),
            client_config.clone(),
        );
        Self {
            store,
            session,
            http_client,
            client_config,
            coordinator,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Executor sending through `transport` with this manager's credential.
    pub fn executor(&self, transport: Arc<dyn Transport>) -> RequestExecutor {
        RequestExecutor::new(transport, self.store.clone(), self.coordinator.clone())
    }

    /// Store a credential obtained by the external login flow.
    ///
    /// Both secrets are replaced; a response without a refresh token removes
    /// any previously stored one. The writes and the transition happen under
    /// the session lock, so a refresh from the previous session cannot commit
    /// in between.
    pub async fn login(&self, response: &TokenResponse) -> Result<Credential> {
        if response.access_token.is_empty() {
            return Err(Error::EmptyAccessToken);
        }

        let mut session = self.session.lock().await;
        self.store
            .set(SecretName::AccessToken, &response.access_token)
            .await?;
        match &response.refresh_token {
            Some(refresh) => self.store.set(SecretName::RefreshToken, refresh).await?,
            None => self.store.delete(SecretName::RefreshToken).await?,
        }
        session.apply(SessionEvent::Login);
        drop(session);

        let credential = Credential::from_response(response, unix_now());
        info!(
            expires_at = credential.expires_at,
            has_refresh_token = credential.refresh_token.is_some(),
            "logged in"
        );
        Ok(credential)
    }

    /// Resume a persisted session.
    ///
    /// Returns `None`, leaving the session logged out, when no access token
    /// is stored. An expired stored token still restores; the first rejected
    /// request refreshes it.
    pub async fn restore(&self) -> Result<Option<Credential>> {
        let Some(access) = self.store.get(SecretName::AccessToken).await? else {
            debug!("no stored access token, staying logged out");
            return Ok(None);
        };
        let refresh = self.store.get(SecretName::RefreshToken).await?;

        let credential = Credential::restored(access, refresh);
        let mut session = self.session.lock().await;
        if session.state() == SessionState::LoggedOut {
            session.apply(SessionEvent::Restore);
        }
        drop(session);
        info!(
            expires_at = credential.expires_at,
            has_refresh_token = credential.refresh_token.is_some(),
            "session restored"
        );
        Ok(Some(credential))
    }

    /// End the session.
    ///
    /// Revocation is attempted first when an endpoint is configured and is
    /// best effort. The logout transition then invalidates any refresh in
    /// flight before the stored secrets are cleared. Store failures are
    /// logged; the session always ends logged out.
    pub async fn logout(&self) -> Result<()> {
        if self.client_config.revocation_endpoint.is_some() {
            match self.store.get(SecretName::AccessToken).await {
                Ok(Some(access)) => {
                    match revoke_token(&self.http_client, &self.client_config, access.expose())
                        .await
                    {
                        Ok(()) => debug!("access token revoked"),
                        Err(e) => warn!(error = %e, "token revocation failed, logging out anyway"),
                    }
                }
                Ok(None) => debug!("no stored access token to revoke"),
                Err(e) => warn!(error = %e, "could not read access token for revocation"),
            }
        }

        let mut session = self.session.lock().await;
        session.apply(SessionEvent::Logout);
        for name in [SecretName::AccessToken, SecretName::RefreshToken] {
            if let Err(e) = self.store.delete(name).await {
                warn!(secret = %name, error = %e, "failed to clear stored secret on logout");
            }
        }
        drop(session);
        info!("logged out");
        Ok(())
    }
}
