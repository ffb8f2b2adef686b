//! Single-flight token refresh
//!
//! At most one token endpoint call is in flight at any time. The first caller
//! to `refresh()` starts a flight on its own task and publishes a `watch`
//! receiver in the `in_flight` slot; every caller that arrives while the slot
//! is occupied clones that receiver and waits for the same result. The flight
//! delivers its outcome and clears the slot under the same lock, so any
//! caller that attached before the clear sees the outcome, and any caller
//! after it starts a fresh flight. Resolved outcomes are never reused.
//!
//! The flight runs to completion even if every caller stops waiting. If the
//! refresh work itself dies, the flight reports a network failure instead.
//!
//! Failure policy: every refresh failure, including a transport failure, is
//! terminal. Both stored secrets are cleared and the session is logged out.

use std::sync::Arc;

use common::Secret;
use oauth_token::{
    ClientConfig, Credential, CredentialStore, SecretName, TokenResponse, claims, unix_now,
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::RefreshError;
use crate::metrics;
use crate::session::{Session, SessionEvent};

/// Result shared with every caller attached to a flight.
pub type RefreshOutcome = Result<Credential, RefreshError>;

type Slot = watch::Receiver<Option<RefreshOutcome>>;

/// Deduplicates concurrent refreshes into one token endpoint call.
///
/// Cheap to clone; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    session: Arc<Session>,
    http_client: reqwest::Client,
    client_config: ClientConfig,
    in_flight: Mutex<Option<Slot>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        session: Arc<Session>,
        http_client: reqwest::Client,
        client_config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                session,
                http_client,
                client_config,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Whether a flight is currently in progress.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().await.is_some()
    }

    /// Obtain a new credential, joining the in-flight refresh if there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut rx = self.attach_or_start().await;

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| {
                Err(RefreshError::NetworkFailure(
                    "refresh finished without an outcome".into(),
                ))
            }),
            Err(_) => Err(RefreshError::NetworkFailure(
                "refresh task ended without an outcome".into(),
            )),
        }
    }

    async fn attach_or_start(&self) -> Slot {
        let mut slot = self.inner.in_flight.lock().await;

        if let Some(rx) = slot.as_ref() {
            // A closed sender without an outcome means the flight task died;
            // start over rather than attach to it.
            let abandoned = rx.has_changed().is_err() && rx.borrow().is_none();
            if !abandoned {
                debug!("refresh already in flight, waiting");
                return rx.clone();
            }
            warn!("previous refresh ended without an outcome, starting a new one");
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        let generation = self.inner.session.begin_refresh().await;
        info!(generation, "starting token refresh");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let work = tokio::spawn({
                let inner = inner.clone();
                async move { inner.perform(generation).await }
            });
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = RefreshError::NetworkFailure(format!("refresh task failed: {e}"));
                    inner.fail(generation, error).await
                }
            };
            let mut slot = inner.in_flight.lock().await;
            tx.send_replace(Some(outcome));
            *slot = None;
            debug!("refresh flight released");
        });

        rx
    }
}

impl Inner {
    async fn perform(&self, generation: u64) -> RefreshOutcome {
        let refresh = match self.store.get(SecretName::RefreshToken).await {
            Ok(Some(token)) => token,
            Ok(None) => return self.fail(generation, RefreshError::NoRefreshToken).await,
            Err(e) => {
                warn!(error = %e, "could not read refresh token");
                return self.fail(generation, RefreshError::NoRefreshToken).await;
            }
        };

        let info = claims::expiration_info(Some(refresh.expose()));
        if info.is_known() {
            debug!(
                expires_at = info.expires_at,
                remaining_seconds = info.remaining_seconds,
                is_expired = info.is_expired,
                "refresh token expiry"
            );
        }

        match oauth_token::refresh_token(&self.http_client, &self.client_config, refresh.expose())
            .await
        {
            Ok(response) => self.commit(generation, response, refresh).await,
            Err(oauth_token::Error::Rejected { status, body }) => {
                self.fail(generation, RefreshError::RefreshRejected { status, body })
                    .await
            }
            Err(e) => {
                self.fail(generation, RefreshError::NetworkFailure(e.to_string()))
                    .await
            }
        }
    }

    /// Persist the new pair and mark the session authenticated.
    ///
    /// If the session was logged out or replaced while the flight was running,
    /// waiters still get the credential but nothing is persisted or published.
    async fn commit(
        &self,
        generation: u64,
        response: TokenResponse,
        previous_refresh: Secret<String>,
    ) -> RefreshOutcome {
        let mut credential = Credential::from_response(&response, unix_now());
        let rotated = credential.refresh_token.is_some();
        if !rotated {
            credential.refresh_token = Some(previous_refresh);
        }

        let mut session = self.session.lock().await;
        if session.generation() != generation {
            info!("session ended during refresh, refreshed credential not persisted");
            metrics::record_refresh("discarded");
            return Ok(credential);
        }

        if let Err(e) = self
            .store
            .set(SecretName::AccessToken, &response.access_token)
            .await
        {
            warn!(error = %e, "failed to persist refreshed access token");
        }
        if let Some(refresh) = &response.refresh_token {
            if let Err(e) = self.store.set(SecretName::RefreshToken, refresh).await {
                warn!(error = %e, "failed to persist rotated refresh token");
            }
        }
        session.apply(SessionEvent::RefreshSucceeded);
        drop(session);

        info!(
            rotated,
            expires_at = credential.expires_at,
            "token refresh succeeded"
        );
        metrics::record_refresh("success");
        Ok(credential)
    }

    /// Tear the session down after a terminal refresh failure.
    async fn fail(&self, generation: u64, error: RefreshError) -> RefreshOutcome {
        warn!(error = %error, "token refresh failed, ending session");
        metrics::record_refresh(error.label());

        let mut session = self.session.lock().await;
        if session.generation() == generation {
            self.clear_store().await;
            session.apply(SessionEvent::RefreshFailed);
        } else {
            debug!("session already replaced, leaving stored credentials alone");
        }
        Err(error)
    }

    async fn clear_store(&self) {
        for name in [SecretName::AccessToken, SecretName::RefreshToken] {
            if let Err(e) = self.store.delete(name).await {
                warn!(secret = %name, error = %e, "failed to clear stored secret");
            }
        }
    }
}
