// ============================================
// File: crates/quicvc-node/src/connection/manager.rs
// ============================================
//! # Connection Manager
//!
//! ## Creation Reason
//! Dialing side of the QUICVC handshake. Each outbound connection gets
//! its own ephemeral UDP socket and receive loop.
//!
//! ## Main Functionality
//! - `connect`: handshake with timeout, returns a `ConnectionStream`
//! - `send` / `close` by connection ID
//! - Node-wide event subscription
//!
//! ## Handshake Timeline
//! ```text
//!  connect(addr)
//!     │  bind ephemeral socket, spawn receive loop
//!     │  Initial → Handshake
//!     │  send INITIAL [VC_INIT]
//!     ▼
//!  wait ── HANDSHAKE [VC_RESPONSE] ok ──► Established ──► Ok(stream)
//!     │
//!     ├── credential rejected ──► Err(CredentialVerification)
//!     └── timeout ──► close ──► Err(HandshakeTimeout)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - There is no retransmission; a lost INITIAL or HANDSHAKE surfaces as
//!   a timeout
//! - Closing an initiator connection shuts its socket, which ends the
//!   receive loop
//!
//! ## Last Modified
//! v0.1.0 - Initial connection manager

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use quicvc_common::types::ConnectionId;
use quicvc_core::credential::CredentialEngine;
use quicvc_core::crypto::{ChaChaPacketProtection, PacketProtection};
use quicvc_core::protocol::PacketType;
use quicvc_transport::{Transport, UdpTransport};

use crate::config::NodeConfig;
use crate::connection::context::{ConnectionContext, ConnectionStream};
use crate::connection::handler::PacketHandler;
use crate::connection::state::{Connection, ConnectionState};
use crate::error::{NodeError, Result};
use crate::events::NodeEvent;

/// Opens and tracks outbound QUICVC connections.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    ctx: Arc<ConnectionContext>,
}

impl ConnectionManager {
    /// Creates a manager using ChaCha20-Poly1305 packet protection.
    #[must_use]
    pub fn new(config: NodeConfig, engine: Arc<CredentialEngine>) -> Self {
        Self::with_protection(config, engine, Arc::new(ChaChaPacketProtection::new()))
    }

    /// Creates a manager with a custom packet protection.
    #[must_use]
    pub fn with_protection(
        config: NodeConfig,
        engine: Arc<CredentialEngine>,
        protection: Arc<dyn PacketProtection>,
    ) -> Self {
        Self {
            ctx: Arc::new(ConnectionContext::new(config, engine, protection, None)),
        }
    }

    /// Returns the credential engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<CredentialEngine> {
        &self.ctx.engine
    }

    /// Subscribes to node-wide events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.ctx.subscribe()
    }

    /// Connects to a listening peer and runs the handshake.
    ///
    /// # Errors
    /// - `ConnectionLimitReached` if the table is full
    /// - `Transport` if no socket can be bound or the INITIAL cannot be sent
    /// - `CredentialVerification` if the server's credential is rejected
    /// - `HandshakeTimeout` if no valid answer arrives in time
    pub async fn connect(&self, addr: SocketAddr) -> Result<ConnectionStream> {
        self.ctx.check_capacity()?;
        let local_credential = self.ctx.engine.ensure_local_credential()?;

        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind_ephemeral(addr).await?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connection, waiter) =
            Connection::initiator(addr, Arc::clone(&transport), local_credential, events_tx);
        let connection = Arc::new(connection);
        let id = connection.id();

        self.ctx.insert(Arc::clone(&connection));
        PacketHandler::initiator(Arc::clone(&self.ctx), transport).spawn();

        connection.transition(ConnectionState::Handshake);
        info!(connection = %id, peer = %addr, "Connecting");

        let frames = connection.initial_frames();
        if let Err(e) = connection
            .send_frames(PacketType::Initial, &frames, self.ctx.protection.as_ref())
            .await
        {
            self.ctx.close(id, Some(&e.to_string())).await;
            return Err(e);
        }

        let timeout = self.ctx.config.handshake.timeout();
        let device_id = match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(Ok(device_id))) => device_id,
            Ok(Ok(Err(e))) => {
                debug!(connection = %id, error = %e, "Handshake failed");
                self.ctx.close(id, None).await;
                return Err(e);
            }
            Ok(Err(_)) => {
                self.ctx.close(id, None).await;
                return Err(NodeError::ConnectionClosed);
            }
            Err(_) => {
                let err = NodeError::HandshakeTimeout {
                    timeout_ms: self.ctx.config.handshake.timeout_ms,
                };
                warn!(connection = %id, peer = %addr, "Handshake timed out");
                self.ctx.close(id, Some(&err.to_string())).await;
                return Err(err);
            }
        };

        self.ctx.spawn_liveness(&connection);
        Ok(ConnectionStream::new(id, addr, Some(device_id), events_rx))
    }

    /// Sends application data on an established connection.
    ///
    /// # Errors
    /// - `NoConnection` for unknown IDs
    /// - `NotEstablished` before the handshake completes
    pub async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        self.ctx.send(id, data).await
    }

    /// Closes a connection. Unknown IDs are ignored.
    pub async fn close(&self, id: ConnectionId) {
        self.ctx.close(id, None).await;
    }

    /// Returns a connection's state, if it exists.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.ctx.get(&id).map(|c| c.state())
    }

    /// Returns the peer's device label, if known.
    #[must_use]
    pub fn remote_device_id(&self, id: ConnectionId) -> Option<String> {
        self.ctx.get(&id).and_then(|c| c.remote_device_id())
    }

    /// Returns the IDs of all open connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.ctx.ids()
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.ctx.len()
    }

    /// Closes every connection.
    pub async fn shutdown(&self) {
        info!(connections = self.ctx.len(), "Shutting down connection manager");
        self.ctx.close_all().await;
    }
}
