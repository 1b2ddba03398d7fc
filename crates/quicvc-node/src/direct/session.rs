// ============================================
// File: crates/quicvc-node/src/direct/session.rs
// ============================================
//! # Direct-Auth Session
//!
//! ## Session Lifecycle
//! ```text
//! ┌────────────┐   vc_request   ┌────────────────┐  peer verified  ┌───────────────┐
//! │ Connecting │ ─────────────► │ Authenticating │ ──────────────► │ Authenticated │
//! └─────┬──────┘                └───────┬────────┘                 └───────┬───────┘
//!       │                               │                                  │ immediately
//!       │                               │                                  ▼
//!       │                               │                             ┌─────────┐
//!       └───────────── vc_error / close / timeout ──────────────────► │  Ready  │
//!                                       │                             └────┬────┘
//!                                       ▼                                  │
//!                                  ┌──────────┐ ◄──────────── close ───────┘
//!                                  │  Closed  │
//!                                  └──────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial direct-auth session

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::{NodeError, Result};

/// Direct-auth session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session exists, nothing exchanged.
    Connecting,
    /// Credential exchange in flight.
    Authenticating,
    /// Peer credential verified.
    Authenticated,
    /// `send()` allowed.
    Ready,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticating)
                | (Self::Authenticating, Self::Authenticated)
                | (Self::Authenticated, Self::Ready)
                | (
                    Self::Connecting | Self::Authenticating | Self::Authenticated | Self::Ready,
                    Self::Closed
                )
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One peer-to-peer session, keyed by remote address.
pub(crate) struct DirectSession {
    remote: SocketAddr,
    state: SessionState,
    remote_device_id: Option<String>,
    awaiting_response: bool,
    last_activity: Instant,
    waiter: Option<oneshot::Sender<Result<String>>>,
}

impl DirectSession {
    pub(crate) fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            state: SessionState::Connecting,
            remote_device_id: None,
            awaiting_response: false,
            last_activity: Instant::now(),
            waiter: None,
        }
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn remote_device_id(&self) -> Option<&str> {
        self.remote_device_id.as_deref()
    }

    pub(crate) fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn set_waiter(&mut self, waiter: oneshot::Sender<Result<String>>) {
        self.waiter = Some(waiter);
    }

    /// Moves to `next` if legal. Returns whether it moved.
    pub(crate) fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        tracing::trace!(peer = %self.remote, from = %self.state, to = %next, "Session transition");
        self.state = next;
        true
    }

    /// Starts (or restarts) an exchange.
    pub(crate) fn begin_authentication(&mut self) {
        if self.state == SessionState::Closed {
            *self = Self::new(self.remote);
        }
        self.transition(SessionState::Authenticating);
    }

    /// Notes that this side sent a `vc_request` and expects a `vc_response`.
    pub(crate) fn request_sent(&mut self) {
        self.awaiting_response = true;
    }

    pub(crate) const fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Returns `true` if this session's own exchange verified `device_id`.
    pub(crate) fn has_verified(&self, device_id: &str) -> bool {
        self.state == SessionState::Ready && self.remote_device_id.as_deref() == Some(device_id)
    }

    /// Records the peer verified by this session's outstanding request and
    /// walks through to `Ready`.
    ///
    /// Returns `false`, leaving the session untouched, unless the session is
    /// `Authenticating` with a request in flight.
    pub(crate) fn mark_verified(&mut self, device_id: &str) -> bool {
        if self.state != SessionState::Authenticating || !self.awaiting_response {
            return false;
        }
        self.awaiting_response = false;
        self.transition(SessionState::Authenticated);
        self.transition(SessionState::Ready);
        self.remote_device_id = Some(device_id.to_string());
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Ok(device_id.to_string()));
        }
        true
    }

    /// Moves to `Closed` and fails any waiter with `error`.
    pub(crate) fn fail(&mut self, error: NodeError) {
        self.awaiting_response = false;
        self.transition(SessionState::Closed);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(error));
        }
    }

    /// Rejects `send()` unless the session is `Ready`.
    pub(crate) fn ensure_ready(&self) -> Result<&str> {
        match (&self.state, &self.remote_device_id) {
            (SessionState::Ready, Some(device_id)) => Ok(device_id),
            _ => Err(NodeError::SessionNotReady {
                peer: self.remote.to_string(),
                state: self.state.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_session_transitions() {
        use SessionState::{Authenticated, Authenticating, Closed, Connecting, Ready};

        assert!(Connecting.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Closed));

        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Authenticating));
        assert!(!Closed.can_transition_to(Connecting));
    }

    #[tokio::test]
    async fn test_mark_verified_resolves_waiter() {
        let mut session = DirectSession::new(addr());
        let (tx, rx) = oneshot::channel();
        session.set_waiter(tx);
        session.begin_authentication();
        session.request_sent();
        assert_eq!(session.state(), SessionState::Authenticating);

        assert!(session.mark_verified("peer"));
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.awaiting_response());
        assert!(session.has_verified("peer"));
        assert!(!session.has_verified("other"));
        assert_eq!(session.ensure_ready().unwrap(), "peer");
        assert_eq!(rx.await.unwrap().unwrap(), "peer");
    }

    #[test]
    fn test_verification_needs_outstanding_request() {
        let mut session = DirectSession::new(addr());
        assert!(!session.mark_verified("peer"));
        assert_eq!(session.state(), SessionState::Connecting);

        // Answering the peer's request is not a request of our own.
        session.begin_authentication();
        assert!(!session.mark_verified("peer"));
        assert_eq!(session.state(), SessionState::Authenticating);
        assert!(session.remote_device_id().is_none());

        session.request_sent();
        assert!(session.mark_verified("peer"));
        assert!(!session.mark_verified("intruder"));
        assert_eq!(session.remote_device_id(), Some("peer"));
    }

    #[test]
    fn test_send_requires_ready() {
        let mut session = DirectSession::new(addr());
        session.begin_authentication();
        let err = session.ensure_ready().unwrap_err();
        assert!(matches!(err, NodeError::SessionNotReady { ref state, .. } if state == "authenticating"));
    }

    #[tokio::test]
    async fn test_fail_closes_and_reports() {
        let mut session = DirectSession::new(addr());
        let (tx, rx) = oneshot::channel();
        session.set_waiter(tx);
        session.begin_authentication();
        session.fail(NodeError::PeerRejected {
            reason: "nope".into(),
        });

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(rx.await.unwrap(), Err(NodeError::PeerRejected { .. })));

        session.begin_authentication();
        assert_eq!(session.state(), SessionState::Authenticating);
    }
}
