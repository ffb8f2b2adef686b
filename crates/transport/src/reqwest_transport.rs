//! reqwest-backed transport.
//!
//! Buffers the whole response body so callers can classify failures and
//! retry without holding a streaming connection open.

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Production transport wrapping a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a transport with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let ApiRequest {
                method,
                url,
                headers,
                body,
            } = request;

            debug!(%method, %url, "sending request");

            let mut builder = self.client.request(method, &url).headers(headers);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();

            debug!(%url, status, bytes = body.len(), "received response");

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forwards_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(header("authorization", "Bearer abc"))
            .and(body_string(r#"{"n":1}"#))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(reqwest::Client::new());
        let mut request =
            ApiRequest::post_json(format!("{}/items", server.uri()), &serde_json::json!({"n": 1}));
        request.set_bearer("abc").unwrap();

        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.text(), "created");
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(reqwest::Client::new());
        let response = transport
            .send(ApiRequest::get(server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is not listening in test environments
        let transport = ReqwestTransport::with_timeout(Duration::from_secs(2)).unwrap();
        let result = transport
            .send(ApiRequest::get("http://127.0.0.1:9/unreachable"))
            .await;
        assert!(result.is_err(), "expected transport failure, got {result:?}");
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::with_timeout(Duration::from_millis(50)).unwrap();
        let result = transport.send(ApiRequest::get(server.uri())).await;
        assert!(matches!(result, Err(TransportError::Timeout)), "got {result:?}");
    }
}
