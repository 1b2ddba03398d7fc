// ============================================
// File: crates/quicvc-node/src/events.rs
// ============================================
//! # Node Events
//!
//! ## Creation Reason
//! Replaces named callbacks with typed channel items.
//!
//! ## Main Functionality
//! - `ConnectionEvent`: per-connection stream (`mpsc`), one consumer
//! - `NodeEvent`: node-wide fan-out (`broadcast`), any number of consumers
//!
//! ```text
//!  Connection ──► mpsc<ConnectionEvent>  ──► owner of the connection
//!       │
//!       └───────► broadcast<NodeEvent>  ──► CLI, logging, other tasks
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Error` and `Closed` are terminal on a connection stream; `Closed`
//!   is always the last item
//! - Broadcast receivers that lag lose events; size the channel accordingly
//!
//! ## Last Modified
//! v0.1.0 - Initial event definitions

use std::net::SocketAddr;

use bytes::Bytes;

use quicvc_common::types::ConnectionId;
use quicvc_core::credential::VerifiedPeer;

/// Capacity of the node-wide broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Item on a single connection's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake finished.
    Connected {
        /// Remote device label.
        device_id: String,
    },
    /// Application data from a `STREAM` frame.
    Data {
        /// Stream the data arrived on.
        stream_id: u64,
        /// Payload bytes.
        payload: Bytes,
    },
    /// Something went wrong; the connection may still be open.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Connection is closed. Nothing follows.
    Closed,
}

/// Node-wide notification.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A connection reached `established`.
    Connected {
        /// Local connection handle.
        connection: ConnectionId,
        /// Remote device label.
        device_id: String,
        /// Remote address.
        remote: SocketAddr,
    },
    /// Application data arrived.
    Data {
        /// Local connection handle.
        connection: ConnectionId,
        /// Remote device label.
        device_id: String,
        /// Payload bytes.
        payload: Bytes,
    },
    /// A connection reported an error.
    Error {
        /// Local connection handle, when one exists.
        connection: Option<ConnectionId>,
        /// Human-readable description.
        message: String,
    },
    /// A connection closed.
    Closed {
        /// Local connection handle.
        connection: ConnectionId,
        /// Remote device label, when known.
        device_id: Option<String>,
    },
    /// A remote credential passed verification.
    PeerAuthenticated(VerifiedPeer),
    /// A direct-auth exchange finished on this side.
    AuthenticationComplete {
        /// Remote device label.
        device_id: String,
        /// Remote address.
        remote: SocketAddr,
    },
    /// A direct-auth exchange failed.
    AuthenticationError {
        /// Why it failed.
        reason: String,
        /// Remote address.
        remote: SocketAddr,
    },
    /// Application data on a ready direct-auth session.
    DirectData {
        /// Remote device label.
        device_id: String,
        /// Remote address.
        remote: SocketAddr,
        /// Payload bytes.
        payload: Bytes,
    },
    /// A `DISCOVERY` announcement arrived.
    Discovery {
        /// Announcing device.
        device_id: String,
        /// Announced key-agreement key.
        public_key_hex: String,
        /// Remote address.
        remote: SocketAddr,
    },
}

impl NodeEvent {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Closed { .. } => "close",
            Self::PeerAuthenticated(_) => "peer_authenticated",
            Self::AuthenticationComplete { .. } => "authentication_complete",
            Self::AuthenticationError { .. } => "authentication_error",
            Self::DirectData { .. } => "direct_data",
            Self::Discovery { .. } => "discovery",
        }
    }
}
