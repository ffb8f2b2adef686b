//! UserInfo endpoint consumer
//!
//! Fetches the authenticated user's profile through the `RequestExecutor`, so
//! an expired access token is refreshed and the call retried like any other
//! resource request.

use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::ApiRequest;

use crate::error::ExecutorError;
use crate::executor::RequestExecutor;

/// Standard OIDC profile claims. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserInfoError {
    #[error(transparent)]
    Request(#[from] ExecutorError),

    #[error("invalid userinfo response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// `GET` the userinfo endpoint at `url` with the current credential.
pub async fn fetch_user_info(
    executor: &RequestExecutor,
    url: &str,
) -> Result<UserInfo, UserInfoError> {
    let request =
        ApiRequest::get(url).with_header(ACCEPT, HeaderValue::from_static("application/json"));
    let response = executor.execute(request).await?;
    let info: UserInfo = response.json()?;
    debug!(has_sub = info.sub.is_some(), "userinfo fetched");
    Ok(info)
}
