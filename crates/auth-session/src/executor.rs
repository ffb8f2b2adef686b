//! Authenticated request execution
//!
//! Every outbound API call goes through `RequestExecutor::execute`:
//! 1. Attach the stored access token as a bearer credential, if there is one
//! 2. Send once; a 2xx response is returned as is
//! 3. Classify the failure; anything but an expired token passes through
//! 4. On expiry, refresh through the coordinator and resend exactly once
//!
//! The resend's outcome is final. A second expiry is returned to the caller
//! rather than triggering another refresh, so a server that rejects every
//! token cannot loop the executor.

use std::sync::Arc;

use oauth_token::{CredentialStore, SecretName, claims};
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};
use uuid::Uuid;

use crate::classify::{ClassifiedError, classify_response, classify_transport};
use crate::coordinator::RefreshCoordinator;
use crate::error::ExecutorError;
use crate::metrics;

/// Wraps a transport with bearer injection and refresh-then-retry.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send `request` with the current credential, refreshing once on expiry.
    #[instrument(
        name = "api_request",
        skip_all,
        fields(request_id = %Uuid::new_v4(), method = %request.method, url = %request.url)
    )]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ExecutorError> {
        let mut first = request.clone();
        self.attach_stored_token(&mut first).await;

        let failure = match self.send(first).await {
            Ok(response) => {
                debug!(status = response.status, "request succeeded");
                metrics::record_request("success");
                return Ok(response);
            }
            Err(failure) => failure,
        };

        if failure != ClassifiedError::TokenExpired {
            self.log_passthrough(&failure).await;
            metrics::record_request("passthrough");
            return Err(ExecutorError::Passthrough(failure));
        }

        info!("access token rejected, refreshing before retry");
        let credential = match self.coordinator.refresh().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "refresh failed, request abandoned");
                metrics::record_request("auth_error");
                return Err(ExecutorError::AuthError(e));
            }
        };

        let mut retry = request;
        if let Err(e) = retry.set_bearer(credential.access_token.expose()) {
            warn!(error = %e, "refreshed access token is not a valid header value");
            metrics::record_request("retried_failure");
            return Err(ExecutorError::Passthrough(classify_transport(e)));
        }

        match self.send(retry).await {
            Ok(response) => {
                info!(status = response.status, "request succeeded after refresh");
                metrics::record_request("retried_success");
                Ok(response)
            }
            Err(failure) => {
                warn!(error = %failure, "request failed after refresh");
                metrics::record_request("retried_failure");
                Err(ExecutorError::Passthrough(failure))
            }
        }
    }

    /// Send once, turning any non-2xx response or transport error into a
    /// classified failure.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClassifiedError> {
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(classify_response(&response)),
            Err(e) => Err(classify_transport(e)),
        }
    }

    /// Attach the stored access token. A missing or unreadable token is not
    /// an error here; the request goes out unauthenticated.
    async fn attach_stored_token(&self, request: &mut ApiRequest) {
        match self.store.get(SecretName::AccessToken).await {
            Ok(Some(token)) => {
                let info = claims::expiration_info(Some(token.expose()));
                debug!(
                    is_expired = info.is_expired,
                    remaining_seconds = info.remaining_seconds,
                    "attaching access token"
                );
                if let Err(e) = request.set_bearer(token.expose()) {
                    warn!(error = %e, "stored access token is not a valid header value");
                }
            }
            Ok(None) => debug!("no access token stored, sending unauthenticated"),
            Err(e) => warn!(error = %e, "could not read access token, sending unauthenticated"),
        }
    }

    async fn log_passthrough(&self, failure: &ClassifiedError) {
        warn!(kind = failure.label(), error = %failure, "request failed");

        // A 400 that is not an expiry is often a token problem the server
        // words differently; record what the stored token looks like.
        if let ClassifiedError::ClientError(400, _) = failure {
            if let Ok(Some(token)) = self.store.get(SecretName::AccessToken).await {
                let info = claims::expiration_info(Some(token.expose()));
                warn!(
                    is_expired = info.is_expired,
                    expires_at = info.expires_at,
                    expires_in = info.expires_in,
                    remaining_seconds = info.remaining_seconds,
                    "bad request with stored token"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorPayload;
    use crate::error::RefreshError;
    use crate::session::{Session, SessionEvent, SessionState, WatchPublisher};
    use oauth_token::{ClientConfig, MemoryCredentialStore};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use transport::{ReqwestTransport, TransportError};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    /// Transport that replays canned outcomes and records what it was sent.
    struct ScriptedTransport {
        outcomes: StdMutex<VecDeque<transport::Result<ApiResponse>>>,
        sent: StdMutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<transport::Result<ApiResponse>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: StdMutex::new(outcomes.into()),
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn bearers(&self) -> Vec<Option<String>> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.bearer().map(str::to_string))
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            request: ApiRequest,
        ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
            self.sent.lock().unwrap().push(request);
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra request");
            Box::pin(async move { outcome })
        }
    }

    struct Harness {
        executor: RequestExecutor,
        store: Arc<MemoryCredentialStore>,
        session: Arc<Session>,
        publisher: Arc<WatchPublisher>,
    }

    fn harness(
        transport: Arc<dyn Transport>,
        token_server: &MockServer,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Harness {
        let store = Arc::new(MemoryCredentialStore::with_tokens(access, refresh));
        let publisher = Arc::new(WatchPublisher::new());
        let session = Arc::new(Session::new(publisher.clone()));
        let config = ClientConfig::new(format!("{}/oauth2/token", token_server.uri()), "client-1")
            .with_client_secret("secret-1");
        let coordinator =
            RefreshCoordinator::new(store.clone(), session.clone(), reqwest::Client::new(), config);
        Harness {
            executor: RequestExecutor::new(transport, store.clone(), coordinator),
            store,
            session,
            publisher,
        }
    }

    async fn token_endpoint(expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new123",
                "refresh_token": "rt456",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    fn ok(body: &str) -> transport::Result<ApiResponse> {
        Ok(ApiResponse::new(200, body))
    }

    fn status(code: u16, body: &str) -> transport::Result<ApiResponse> {
        Ok(ApiResponse::new(code, body))
    }

    #[tokio::test]
    async fn success_is_returned_without_refresh() {
        let tokens = token_endpoint(0).await;
        let transport = ScriptedTransport::new(vec![ok("hello")]);
        let h = harness(transport.clone(), &tokens, Some("at_valid"), Some("rt"));

        let response = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap();

        assert_eq!(response.text(), "hello");
        assert_eq!(transport.bearers(), vec![Some("at_valid".to_string())]);
    }

    #[tokio::test]
    async fn missing_token_sends_unauthenticated_then_logs_out() {
        let tokens = token_endpoint(0).await;
        let transport = ScriptedTransport::new(vec![status(401, "")]);
        let h = harness(transport.clone(), &tokens, None, None);

        let err = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap_err();

        assert_eq!(err, ExecutorError::AuthError(RefreshError::NoRefreshToken));
        assert_eq!(transport.bearers(), vec![None]);
        assert_eq!(h.session.state().await, SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_resent() {
        let tokens = token_endpoint(1).await;
        let transport = ScriptedTransport::new(vec![status(401, ""), ok("profile")]);
        let h = harness(transport.clone(), &tokens, Some("at_old"), Some("rt_old"));
        h.session.apply(SessionEvent::Login).await;

        let response = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap();

        assert_eq!(response.text(), "profile");
        assert_eq!(
            transport.bearers(),
            vec![Some("at_old".to_string()), Some("new123".to_string())]
        );
        let stored = h.store.get(SecretName::AccessToken).await.unwrap().unwrap();
        assert_eq!(stored.expose(), "new123");
        assert_eq!(*h.publisher.subscribe().borrow(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn expiry_reported_as_400_triggers_refresh() {
        let tokens = token_endpoint(1).await;
        let transport = ScriptedTransport::new(vec![
            status(400, r#"{"error":"invalid_token","error_description":"expired"}"#),
            ok("done"),
        ]);
        let h = harness(transport.clone(), &tokens, Some("at_old"), Some("rt_old"));

        let response = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap();
        assert_eq!(response.text(), "done");
    }

    #[tokio::test]
    async fn second_failure_is_final() {
        let tokens = token_endpoint(1).await;
        let transport = ScriptedTransport::new(vec![status(401, ""), status(401, "still no")]);
        let h = harness(transport.clone(), &tokens, Some("at_old"), Some("rt_old"));

        let err = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap_err();

        assert_eq!(err, ExecutorError::Passthrough(ClassifiedError::TokenExpired));
        // ScriptedTransport panics on a third send, so two sends is the cap
        assert_eq!(transport.bearers().len(), 2);
    }

    #[tokio::test]
    async fn second_failure_is_returned_verbatim() {
        let tokens = token_endpoint(1).await;
        let transport = ScriptedTransport::new(vec![
            status(401, ""),
            status(422, r#"{"error":"invalid_request"}"#),
        ]);
        let h = harness(transport, &tokens, Some("at_old"), Some("rt_old"));

        let err = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExecutorError::Passthrough(ClassifiedError::ClientError(
                422,
                Some(ErrorPayload::Structured(
                    serde_json::json!({"error": "invalid_request"})
                ))
            ))
        );
    }

    #[tokio::test]
    async fn non_expiry_errors_pass_through_without_refresh() {
        let tokens = token_endpoint(0).await;
        let transport = ScriptedTransport::new(vec![
            status(400, r#"{"error":"invalid_request"}"#),
            status(503, "unavailable"),
            Err(TransportError::Timeout),
        ]);
        let h = harness(transport, &tokens, Some("at_valid"), Some("rt"));
        let request = ApiRequest::get("https://api.example.com/items");

        let err = h.executor.execute(request.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Passthrough(ClassifiedError::ClientError(400, Some(_)))
        ));

        let err = h.executor.execute(request.clone()).await.unwrap_err();
        assert_eq!(err, ExecutorError::Passthrough(ClassifiedError::ServerError(503)));

        let err = h.executor.execute(request).await.unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Passthrough(ClassifiedError::NetworkError(TransportError::Timeout))
        );

        // Session untouched
        let stored = h.store.get(SecretName::AccessToken).await.unwrap().unwrap();
        assert_eq!(stored.expose(), "at_valid");
    }

    #[tokio::test]
    async fn refresh_failure_is_auth_error_without_resend() {
        let tokens = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&tokens)
            .await;
        let transport = ScriptedTransport::new(vec![status(401, "")]);
        let h = harness(transport.clone(), &tokens, Some("at_old"), Some("rt_bad"));
        h.session.apply(SessionEvent::Login).await;

        let err = h
            .executor
            .execute(ApiRequest::get("https://api.example.com/me"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::AuthError(RefreshError::RefreshRejected { status: 400, .. })
        ));
        assert_eq!(transport.bearers().len(), 1);
        assert_eq!(h.session.state().await, SessionState::LoggedOut);
        assert!(h.store.get(SecretName::RefreshToken).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_expiries_share_one_refresh() {
        let tokens = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "access_token": "new123",
                        "refresh_token": "rt456"
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&tokens)
            .await;

        // Resource server accepts only the refreshed token
        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer new123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&api)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&api)
            .await;

        let transport = Arc::new(ReqwestTransport::new(reqwest::Client::new()));
        let h = harness(transport, &tokens, Some("at_old"), Some("rt_old"));
        h.session.apply(SessionEvent::Login).await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let executor = h.executor.clone();
            let url = format!("{}/items/{i}", api.uri());
            handles.push(tokio::spawn(async move {
                executor.execute(ApiRequest::get(url)).await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.text(), "ok");
        }

        let retried: Vec<Request> = api.received_requests().await.unwrap();
        let authorized = retried
            .iter()
            .filter(|r| {
                r.headers
                    .get("authorization")
                    .is_some_and(|v| v == "Bearer new123")
            })
            .count();
        assert_eq!(authorized, 6);
    }

    #[tokio::test]
    async fn concurrent_expiries_share_one_failure() {
        let tokens = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":"invalid_grant"}"#)
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&tokens)
            .await;

        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&api)
            .await;

        let transport = Arc::new(ReqwestTransport::new(reqwest::Client::new()));
        let h = harness(transport, &tokens, Some("at_old"), Some("rt_old"));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let executor = h.executor.clone();
            let url = format!("{}/me", api.uri());
            handles.push(tokio::spawn(async move {
                executor.execute(ApiRequest::get(url)).await
            }));
        }

        let expected = ExecutorError::AuthError(RefreshError::RefreshRejected {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        });
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap_err(), expected);
        }
        assert_eq!(h.session.state().await, SessionState::LoggedOut);
    }
}
