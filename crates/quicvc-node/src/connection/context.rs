// ============================================
// File: crates/quicvc-node/src/connection/context.rs
// ============================================
//! # Connection Context
//!
//! ## Creation Reason
//! The dialing manager and the listener share one set of moving parts:
//! a connection table, the credential engine, packet protection and the
//! node-wide event channel. This module owns them.
//!
//! ## Main Functionality
//! - Connection table keyed by local connection ID
//! - `send` / `close` / liveness shared by both roles
//! - `ConnectionStream`: the per-connection event receiver handed to callers
//!
//! ## ⚠️ Important Note for Next Developer
//! - `close` is idempotent; the first caller removes the entry and
//!   everyone else sees a no-op
//! - Liveness tasks exit on their own once their entry leaves the table
//!
//! ## Last Modified
//! v0.1.0 - Initial connection context

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use quicvc_common::time::Timestamp;
use quicvc_common::types::ConnectionId;
use quicvc_core::credential::CredentialEngine;
use quicvc_core::crypto::PacketProtection;
use quicvc_core::protocol::{Frame, PacketType};

use crate::config::NodeConfig;
use crate::connection::state::{Connection, ConnectionRole, ConnectionState};
use crate::error::{NodeError, Result};
use crate::events::{ConnectionEvent, NodeEvent, EVENT_CHANNEL_CAPACITY};

// ============================================
// ConnectionStream
// ============================================

/// Receiving end of one connection's events.
///
/// Yields `Connected`, then any number of `Data`/`Error`, then `Closed`.
#[derive(Debug)]
pub struct ConnectionStream {
    id: ConnectionId,
    remote_addr: SocketAddr,
    remote_device_id: Option<String>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionStream {
    pub(crate) const fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        remote_device_id: Option<String>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            remote_device_id,
            events,
        }
    }

    /// Returns the local connection handle.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the peer's device label.
    #[must_use]
    pub fn remote_device_id(&self) -> Option<&str> {
        self.remote_device_id.as_deref()
    }

    /// Waits for the next event. `None` after `Closed`.
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Waits for the next `Data` payload, skipping other events.
    ///
    /// Returns `None` once the connection closes.
    pub async fn next_data(&mut self) -> Option<bytes::Bytes> {
        loop {
            match self.events.recv().await? {
                ConnectionEvent::Data { payload, .. } => return Some(payload),
                ConnectionEvent::Closed => return None,
                _ => {}
            }
        }
    }
}

// ============================================
// ConnectionContext
// ============================================

/// State shared by the receive loop, liveness tasks and the public API.
pub(crate) struct ConnectionContext {
    pub(crate) engine: Arc<CredentialEngine>,
    pub(crate) protection: Arc<dyn PacketProtection>,
    pub(crate) config: NodeConfig,
    events: broadcast::Sender<NodeEvent>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// (remote address, client SCID) → local ID, for duplicate `INITIAL`s.
    peer_index: DashMap<(SocketAddr, ConnectionId), ConnectionId>,
    /// Responder streams held until the connection is established.
    pending_streams: DashMap<ConnectionId, mpsc::UnboundedReceiver<ConnectionEvent>>,
    incoming: Option<mpsc::UnboundedSender<ConnectionStream>>,
}

impl ConnectionContext {
    pub(crate) fn new(
        config: NodeConfig,
        engine: Arc<CredentialEngine>,
        protection: Arc<dyn PacketProtection>,
        incoming: Option<mpsc::UnboundedSender<ConnectionStream>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            protection,
            config,
            events,
            connections: DashMap::new(),
            peer_index: DashMap::new(),
            pending_streams: DashMap::new(),
            incoming,
        }
    }

    // ========================================
    // Events
    // ========================================

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: NodeEvent) {
        trace!(event = event.kind(), "Publishing node event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ========================================
    // Table
    // ========================================

    pub(crate) fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|c| *c.key()).collect()
    }

    /// Fails with `ConnectionLimitReached` when the table is full.
    pub(crate) fn check_capacity(&self) -> Result<()> {
        let limit = self.config.limits.max_connections;
        if self.connections.len() >= limit {
            warn!(limit, "Connection limit reached");
            return Err(NodeError::ConnectionLimitReached { limit });
        }
        Ok(())
    }

    pub(crate) fn insert(&self, connection: Arc<Connection>) {
        debug!(connection = %connection.id(), role = ?connection.role(), "Connection registered");
        self.connections.insert(connection.id(), connection);
    }

    /// Registers a responder connection and parks its event stream.
    pub(crate) fn insert_responder(
        &self,
        connection: Arc<Connection>,
        client_cid: ConnectionId,
        stream: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        self.peer_index
            .insert((connection.remote_addr(), client_cid), connection.id());
        self.pending_streams.insert(connection.id(), stream);
        self.insert(connection);
    }

    /// Looks up a responder by the client's SCID.
    pub(crate) fn find_by_peer(&self, remote: SocketAddr, client_cid: ConnectionId) -> Option<Arc<Connection>> {
        let id = *self.peer_index.get(&(remote, client_cid))?;
        self.get(&id)
    }

    /// Hands an established responder's stream to `accept()`.
    pub(crate) fn deliver_incoming(&self, connection: &Connection) {
        let Some((_, events)) = self.pending_streams.remove(&connection.id()) else {
            return;
        };
        let stream = ConnectionStream::new(
            connection.id(),
            connection.remote_addr(),
            connection.remote_device_id(),
            events,
        );
        if let Some(incoming) = &self.incoming {
            if incoming.send(stream).is_err() {
                debug!(connection = %connection.id(), "Accept queue closed; dropping stream");
            }
        }
    }

    // ========================================
    // Operations
    // ========================================

    /// Sends `data` on an established connection.
    ///
    /// # Errors
    /// - `NoConnection` for unknown IDs
    /// - `NotEstablished` before the handshake completes
    pub(crate) async fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let connection = self.get(&id).ok_or(NodeError::NoConnection(id))?;
        connection.send_stream(data, self.protection.as_ref()).await
    }

    /// Closes a connection. Unknown IDs are a no-op.
    ///
    /// Returns `true` if this call closed it.
    pub(crate) async fn close(&self, id: ConnectionId, reason: Option<&str>) -> bool {
        let Some((_, connection)) = self.connections.remove(&id) else {
            trace!(connection = %id, "Close on unknown connection ignored");
            return false;
        };
        self.peer_index.retain(|_, local| *local != id);
        self.pending_streams.remove(&id);

        let device_id = connection.remote_device_id();
        if !connection.mark_closed(reason) {
            return false;
        }

        if connection.role() == ConnectionRole::Initiator {
            if let Err(e) = connection.transport().shutdown().await {
                debug!(connection = %id, error = %e, "Socket shutdown failed");
            }
        }

        if let Some(reason) = reason {
            self.publish(NodeEvent::Error {
                connection: Some(id),
                message: reason.to_string(),
            });
        }
        info!(connection = %id, device_id = ?device_id, reason = ?reason, "Connection closed");
        self.publish(NodeEvent::Closed {
            connection: id,
            device_id,
        });
        true
    }

    /// Closes every connection.
    pub(crate) async fn close_all(&self) {
        for id in self.ids() {
            self.close(id, None).await;
        }
    }

    /// Starts the heartbeat / idle-timeout task for a connection.
    ///
    /// Initiators probe; both roles close after `idle_timeout` of silence.
    pub(crate) fn spawn_liveness(self: &Arc<Self>, connection: &Arc<Connection>) {
        let ctx = Arc::clone(self);
        let id = connection.id();
        let period = self.config.heartbeat.interval();
        let idle_timeout = self.config.heartbeat.idle_timeout();

        tokio::spawn(async move {
            let mut ticker = interval_at(TokioInstant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(connection) = ctx.get(&id) else {
                    trace!(connection = %id, "Liveness task stopping");
                    break;
                };

                if connection.is_idle(idle_timeout) {
                    let idle = connection.idle_time();
                    warn!(connection = %id, idle_secs = idle.as_secs(), "Connection idle; closing");
                    let reason = format!("idle for {} s", idle.as_secs());
                    ctx.close(id, Some(&reason)).await;
                    break;
                }

                if connection.role() == ConnectionRole::Initiator
                    && connection.state() == ConnectionState::Established
                {
                    let frame = Frame::Heartbeat {
                        timestamp: Timestamp::now(),
                        sequence: connection.next_heartbeat_sequence(),
                        ack: false,
                    };
                    if let Err(e) = connection
                        .send_frames(PacketType::Protected, &[frame], ctx.protection.as_ref())
                        .await
                    {
                        ctx.publish(NodeEvent::Error {
                            connection: Some(id),
                            message: e.to_string(),
                        });
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("device_id", &self.engine.device_id())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
