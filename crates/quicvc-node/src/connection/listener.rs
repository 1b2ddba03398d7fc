// ============================================
// File: crates/quicvc-node/src/connection/listener.rs
// ============================================
//! # QUICVC Listener
//!
//! ## Creation Reason
//! Accepting side of the handshake. All inbound connections share the
//! listener's socket and are told apart by connection ID.
//!
//! ## Main Functionality
//! - `bind`: open the socket and start the receive loop
//! - `accept`: yields a `ConnectionStream` per established peer
//! - `send` / `close` by connection ID
//!
//! ## ⚠️ Important Note for Next Developer
//! - A connection is handed to `accept()` only after the client's first
//!   authenticated PROTECTED packet
//! - `shutdown` closes every connection before stopping the socket
//!
//! ## Last Modified
//! v0.1.0 - Initial listener

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use quicvc_common::types::ConnectionId;
use quicvc_core::credential::CredentialEngine;
use quicvc_core::crypto::{ChaChaPacketProtection, PacketProtection};
use quicvc_transport::{Transport, UdpTransport};

use crate::config::NodeConfig;
use crate::connection::context::{ConnectionContext, ConnectionStream};
use crate::connection::handler::PacketHandler;
use crate::connection::state::ConnectionState;
use crate::error::Result;
use crate::events::NodeEvent;

/// Accepts inbound QUICVC connections on one UDP socket.
pub struct QuicVcListener {
    ctx: Arc<ConnectionContext>,
    transport: Arc<UdpTransport>,
    incoming: Mutex<mpsc::UnboundedReceiver<ConnectionStream>>,
    closed: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
}

impl QuicVcListener {
    /// Binds `config.network.listen_addr` with ChaCha20-Poly1305 protection.
    ///
    /// # Errors
    /// Returns `Transport` if the address cannot be bound.
    pub async fn bind(config: NodeConfig, engine: Arc<CredentialEngine>) -> Result<Self> {
        Self::bind_with_protection(config, engine, Arc::new(ChaChaPacketProtection::new())).await
    }

    /// Binds with a custom packet protection.
    ///
    /// # Errors
    /// Returns `Transport` if the address cannot be bound.
    pub async fn bind_with_protection(
        config: NodeConfig,
        engine: Arc<CredentialEngine>,
        protection: Arc<dyn PacketProtection>,
    ) -> Result<Self> {
        // Fail here rather than on the first INITIAL.
        engine.ensure_local_credential()?;

        let transport = Arc::new(UdpTransport::bind_addr(config.network.listen_addr).await?);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(ConnectionContext::new(
            config,
            engine,
            protection,
            Some(incoming_tx),
        ));

        let shared: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        let recv_task = PacketHandler::listener(Arc::clone(&ctx), shared).spawn();

        info!(addr = %transport.local_addr()?, device_id = %ctx.engine.device_id(), "Listener started");

        Ok(Self {
            ctx,
            transport,
            incoming: Mutex::new(incoming_rx),
            closed: watch::channel(false).0,
            recv_task,
        })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    /// Returns `Transport` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
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

    /// Waits for the next established inbound connection.
    ///
    /// Returns `None` after shutdown.
    pub async fn accept(&self) -> Option<ConnectionStream> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            stream = incoming.recv() => stream,
            _ = closed.wait_for(|c| *c) => None,
        }
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

    /// Returns the IDs of all open connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.ctx.ids()
    }

    /// Closes every connection and stops the socket.
    ///
    /// # Errors
    /// Returns `Transport` if the socket cannot be shut down.
    pub async fn shutdown(&self) -> Result<()> {
        info!(connections = self.ctx.len(), "Shutting down listener");
        self.closed.send_replace(true);
        self.ctx.close_all().await;
        self.transport.shutdown().await?;
        debug!("Listener stopped");
        Ok(())
    }
}

impl Drop for QuicVcListener {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

impl std::fmt::Debug for QuicVcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicVcListener")
            .field("local_addr", &self.transport.local_addr().ok())
            .field("context", &self.ctx)
            .finish_non_exhaustive()
    }
}
