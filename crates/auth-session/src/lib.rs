//! Bearer session lifecycle for OAuth2 resource requests
//!
//! Keeps one credential valid across many concurrent callers. Requests go
//! through `RequestExecutor`, which retries once after a refresh when the
//! resource server rejects the token. Refreshes are deduplicated by
//! `RefreshCoordinator`, and every state change is published through
//! `Session`.
//!
//! Session lifecycle:
//! 1. `SessionManager::login()` stores a token pair → `Authenticated`
//! 2. A request fails with an expired token → `Refreshing`
//! 3. The refresh succeeds → `Authenticated`, the request is resent once
//! 4. The refresh fails for any reason → secrets cleared, `LoggedOut`
//! 5. `SessionManager::logout()` → secrets cleared, `LoggedOut`

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod userinfo;

pub use classify::{
    ClassifiedError, ErrorPayload, classify_response, classify_status, classify_transport,
};
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use error::{Error, ExecutorError, RefreshError, Result};
pub use executor::RequestExecutor;
pub use manager::SessionManager;
pub use session::{
    Session, SessionEvent, SessionGuard, SessionPublisher, SessionState, WatchPublisher,
};
pub use userinfo::{UserInfo, UserInfoError, fetch_user_info};
