// ============================================
// File: crates/quicvc-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Main Functionality
//! - `NodeError`: everything a caller of the connection manager or the
//!   direct-auth session manager can see
//! - Classification helpers used by the CLI and the receive loops
//!
//! ## Last Modified
//! v0.1.0 - Initial node error definitions

use thiserror::Error;

use quicvc_common::error::CommonError;
use quicvc_common::types::ConnectionId;
use quicvc_core::error::{CoreError, CredentialError};
use quicvc_transport::error::TransportError;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path
        path: String,
        /// Why loading failed
        reason: String,
    },

    /// Configuration value is out of range.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Offending field
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// Identity file could not be read, parsed or written.
    #[error("Identity file '{path}': {reason}")]
    Identity {
        /// File path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// The handshake did not complete in time.
    #[error("Handshake timed out after {timeout_ms} ms")]
    HandshakeTimeout {
        /// Configured timeout
        timeout_ms: u64,
    },

    /// The connection exists but has not completed its handshake.
    #[error("Connection {0} is not established")]
    NotEstablished(ConnectionId),

    /// No connection with that identifier.
    #[error("No connection {0}")]
    NoConnection(ConnectionId),

    /// The direct-auth session to this peer is not ready.
    #[error("Session with {peer} is not ready (state: {state})")]
    SessionNotReady {
        /// Remote address
        peer: String,
        /// Current session state
        state: String,
    },

    /// Connection table is full.
    #[error("Connection limit reached: max {limit}")]
    ConnectionLimitReached {
        /// Configured limit
        limit: usize,
    },

    /// The connection was closed while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Remote credential was rejected.
    #[error("Credential verification failed: {0}")]
    CredentialVerification(#[from] CredentialError),

    /// A direct-auth exchange failed locally.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Why verification failed
        reason: String,
    },

    /// The peer reported an error.
    #[error("Peer rejected the exchange: {reason}")]
    PeerRejected {
        /// Reason sent by the peer
        reason: String,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Protocol or crypto error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Socket error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Plain I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Identity` error.
    pub fn identity(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Identity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if the caller used a connection in the wrong state.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::NotEstablished(_)
                | Self::NoConnection(_)
                | Self::SessionNotReady { .. }
                | Self::ConnectionClosed
        )
    }

    /// Returns `true` if the process cannot continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::Identity { .. } => true,
            Self::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HandshakeTimeout { .. } | Self::ConnectionLimitReached { .. } => true,
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::config_load("/etc/quicvc.toml", "file not found");
        assert!(err.to_string().contains("/etc/quicvc.toml"));

        let err = NodeError::HandshakeTimeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Handshake timed out after 5000 ms");
    }

    #[test]
    fn test_error_classification() {
        let config_err = NodeError::config_invalid("handshake.timeout_ms", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(config_err.is_fatal());

        let state = NodeError::NotEstablished(ConnectionId::generate());
        assert!(state.is_state_error());
        assert!(!state.is_retryable());

        assert!(NodeError::HandshakeTimeout { timeout_ms: 1 }.is_retryable());
    }

    #[test]
    fn test_credential_error_converts() {
        let err: NodeError = CredentialError::InvalidSignature.into();
        assert!(matches!(err, NodeError::CredentialVerification(_)));
    }
}
