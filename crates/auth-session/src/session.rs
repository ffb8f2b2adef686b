//! Session state machine and publication
//!
//! `SessionState::on` is a pure transition function: it receives an event and
//! returns the next state, or `None` if the event is not valid in the current
//! state. `Session` owns the current state, applies transitions, and notifies
//! the `SessionPublisher` of every applied transition. Publishers observe only;
//! nothing they do feeds back into the state.
//!
//! Transitions:
//! - LoggedOut → Authenticated (Login, Restore)
//! - Authenticated → Authenticated (Login, replacing the credential)
//! - Authenticated / LoggedOut → Refreshing (RefreshStarted)
//! - Refreshing → Authenticated (RefreshSucceeded)
//! - Refreshing → LoggedOut (RefreshFailed)
//! - any → LoggedOut (Logout)
//!
//! Login and Logout advance the session generation. A refresh that started
//! under an older generation must not write its result into a session that has
//! since been logged out or replaced. Callers that persist credentials do so
//! through a `SessionGuard`, so the generation check, the store writes and the
//! transition happen under one lock.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info};

/// Authentication status broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    Authenticated,
    Refreshing,
}

impl SessionState {
    /// Next state after `event`, or `None` if the event is rejected.
    pub fn on(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (_, Login) => Some(Authenticated),
            (LoggedOut, Restore) => Some(Authenticated),
            (Authenticated | LoggedOut, RefreshStarted) => Some(Refreshing),
            (Refreshing, RefreshSucceeded) => Some(Authenticated),
            (Refreshing, RefreshFailed) => Some(LoggedOut),
            (_, Logout) => Some(LoggedOut),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::LoggedOut => "logged_out",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that drive session transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Login,
    Restore,
    RefreshStarted,
    RefreshSucceeded,
    RefreshFailed,
    Logout,
}

impl SessionEvent {
    fn starts_generation(self) -> bool {
        matches!(self, SessionEvent::Login | SessionEvent::Logout)
    }
}

/// Receives every applied session transition.
///
/// Called while the session lock is held so subscribers observe transitions
/// in order. Implementations must not call back into the `Session`.
pub trait SessionPublisher: Send + Sync {
    fn publish(&self, state: SessionState);
}

impl<F> SessionPublisher for F
where
    F: Fn(SessionState) + Send + Sync,
{
    fn publish(&self, state: SessionState) {
        self(state)
    }
}

/// Publisher that fans transitions out through a `watch` channel.
pub struct WatchPublisher {
    tx: watch::Sender<SessionState>,
}

impl WatchPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::LoggedOut);
        Self { tx }
    }

    /// Receiver that always holds the latest published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for WatchPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPublisher for WatchPublisher {
    fn publish(&self, state: SessionState) {
        self.tx.send_replace(state);
    }
}

struct SessionInner {
    state: SessionState,
    generation: u64,
}

/// Current session state plus the generation counter.
pub struct Session {
    inner: Mutex<SessionInner>,
    publisher: Arc<dyn SessionPublisher>,
}

impl Session {
    /// New session in `LoggedOut`. Nothing is published for the initial state.
    pub fn new(publisher: Arc<dyn SessionPublisher>) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::LoggedOut,
                generation: 0,
            }),
            publisher,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Apply `event` and publish the new state.
    ///
    /// Returns the new state, or `None` if the transition was rejected.
    pub async fn apply(&self, event: SessionEvent) -> Option<SessionState> {
        self.lock().await.apply(event)
    }

    /// Hold the session until the guard drops.
    ///
    /// Store writes made while holding the guard cannot interleave with a
    /// login, logout or refresh commit. The store must not call back into the
    /// session.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            inner: self.inner.lock().await,
        }
    }

    /// Enter `Refreshing`, returning the generation the refresh belongs to.
    pub async fn begin_refresh(&self) -> u64 {
        let mut session = self.lock().await;
        session.apply(SessionEvent::RefreshStarted);
        session.generation()
    }

    fn transition(&self, inner: &mut SessionInner, event: SessionEvent) -> Option<SessionState> {
        let from = inner.state;
        let Some(to) = from.on(event) else {
            debug!(?event, state = %from, "session transition rejected");
            return None;
        };

        inner.state = to;
        if event.starts_generation() {
            inner.generation += 1;
        }
        info!(?event, from = %from, to = %to, generation = inner.generation, "session transition");
        self.publisher.publish(to);
        Some(to)
    }
}

/// Exclusive access to the session state and generation.
pub struct SessionGuard<'a> {
    session: &'a Session,
    inner: MutexGuard<'a, SessionInner>,
}

impl SessionGuard<'_> {
    pub fn state(&self) -> SessionState {
        self.inner.state
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Apply `event` and publish the new state.
    pub fn apply(&mut self, event: SessionEvent) -> Option<SessionState> {
        self.session.transition(&mut self.inner, event)
    }
}
