// ============================================
// File: crates/quicvc-node/src/direct/manager.rs
// ============================================
//! # Direct-Auth Session Manager
//!
//! ## Creation Reason
//! Peer-to-peer sessions that skip the packet-header handshake: every
//! datagram is one service byte plus a JSON body, and peers authenticate
//! with the plain credential exchange.
//!
//! ## Main Functionality
//! - `authenticate`: run the exchange against a peer, wait for `Ready`
//! - `send`: base64 `DATA` on a ready session
//! - `announce` / `heartbeat`: `DISCOVERY` and `HEARTBEAT` datagrams
//! - Receive loop dispatching by service type
//!
//! ## Exchange Over VC_EXCHANGE
//! ```text
//!   A (authenticate)                       B
//!   ────────────────                       ─
//!   vc_request ──────────────────────────►
//!              ◄────────────────────────── vc_response (B's credential)
//!   verify → Ready
//!   vc_ack ──────────────────────────────►
//!                                          A unverified? → vc_request
//!              ◄────────────────────────── vc_request
//!   vc_response (A's credential) ────────►
//!                                          verify → Ready
//!              ◄────────────────────────── vc_ack
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Sessions are keyed by remote address; there are no connection IDs
//! - A `DashMap` entry guard must not live across an `.await`; collect
//!   what to send first, then send
//! - Only a `vc_response` answering this side's own `vc_request` verifies
//!   a peer; stray `vc_response`/`vc_ack` datagrams never advance a session
//!
//! ## Last Modified
//! v0.1.0 - Initial direct-auth session manager

use std::net::SocketAddr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use quicvc_common::time::unix_timestamp_millis;
use quicvc_core::credential::{handle_message, start_exchange, CredentialEngine, ExchangeEvent, VcMessage};
use quicvc_core::protocol::service::{DataMessage, DiscoveryAnnouncement, HeartbeatMessage};
use quicvc_core::protocol::{decode_service, encode_service, parse_body, ServiceType};
use quicvc_transport::{Transport, TransportError, UdpTransport, MAX_UDP_PAYLOAD};

use crate::config::NodeConfig;
use crate::direct::session::{DirectSession, SessionState};
use crate::error::{NodeError, Result};
use crate::events::{NodeEvent, EVENT_CHANNEL_CAPACITY};

struct Inner {
    engine: Arc<CredentialEngine>,
    config: NodeConfig,
    transport: Arc<UdpTransport>,
    sessions: DashMap<SocketAddr, DirectSession>,
    events: broadcast::Sender<NodeEvent>,
}

/// Runs credential-authenticated sessions over service-byte framing.
pub struct DirectSessionManager {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl DirectSessionManager {
    /// Binds `config.network.listen_addr` and starts the receive loop.
    ///
    /// # Errors
    /// Returns `Transport` if the address cannot be bound.
    pub async fn bind(config: NodeConfig, engine: Arc<CredentialEngine>) -> Result<Self> {
        let transport = Arc::new(UdpTransport::bind_addr(config.network.listen_addr).await?);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            engine,
            config,
            transport,
            sessions: DashMap::new(),
            events,
        });

        let tasks = vec![
            Arc::clone(&inner).spawn_recv_loop(),
            Arc::clone(&inner).spawn_idle_sweep(),
        ];

        info!(addr = %inner.transport.local_addr()?, "Direct-auth manager started");
        Ok(Self { inner, tasks })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    /// Returns `Transport` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.transport.local_addr()?)
    }

    /// Returns the credential engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<CredentialEngine> {
        &self.inner.engine
    }

    /// Subscribes to node-wide events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Runs the credential exchange with `addr` and waits for `Ready`.
    ///
    /// # Returns
    /// The peer's device label.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the peer's credential is rejected
    /// - `PeerRejected` if the peer answers `vc_error`
    /// - `HandshakeTimeout` if the session is not ready in time
    pub async fn authenticate(&self, addr: SocketAddr) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut session = self
                .inner
                .sessions
                .entry(addr)
                .or_insert_with(|| DirectSession::new(addr));
            if let (SessionState::Ready, Some(device_id)) = (session.state(), session.remote_device_id()) {
                return Ok(device_id.to_string());
            }
            session.begin_authentication();
            session.request_sent();
            session.set_waiter(tx);
        }

        info!(peer = %addr, "Starting credential exchange");
        if let Err(e) = self
            .inner
            .send_service(addr, ServiceType::VcExchange, &start_exchange(&self.inner.engine))
            .await
        {
            self.inner.remove_session(addr);
            return Err(e);
        }

        let timeout = self.inner.config.handshake.timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NodeError::ConnectionClosed),
            Err(_) => {
                warn!(peer = %addr, "Credential exchange timed out");
                self.inner.remove_session(addr);
                Err(NodeError::HandshakeTimeout {
                    timeout_ms: self.inner.config.handshake.timeout_ms,
                })
            }
        }
    }

    /// Sends application data to a ready peer.
    ///
    /// # Errors
    /// `SessionNotReady` unless the session with `addr` is `Ready`.
    pub async fn send(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        {
            let session = self.inner.sessions.get(&addr).ok_or_else(|| NodeError::SessionNotReady {
                peer: addr.to_string(),
                state: "none".to_string(),
            })?;
            session.ensure_ready()?;
        }

        let message = DataMessage {
            device_id: self.inner.engine.device_id().to_string(),
            data: BASE64.encode(data),
        };
        self.inner.send_service(addr, ServiceType::Data, &message).await
    }

    /// Announces this device to `addr`.
    ///
    /// # Errors
    /// Returns `Transport` if the datagram cannot be sent.
    pub async fn announce(&self, addr: SocketAddr) -> Result<()> {
        let announcement = DiscoveryAnnouncement {
            device_id: self.inner.engine.device_id().to_string(),
            public_key_hex: self.inner.engine.public_key_hex(),
        };
        self.inner
            .send_service(addr, ServiceType::Discovery, &announcement)
            .await
    }

    /// Sends a liveness probe to `addr`.
    ///
    /// # Errors
    /// Returns `Transport` if the datagram cannot be sent.
    pub async fn heartbeat(&self, addr: SocketAddr) -> Result<()> {
        let message = HeartbeatMessage {
            device_id: self.inner.engine.device_id().to_string(),
            timestamp: unix_timestamp_millis(),
        };
        self.inner
            .send_service(addr, ServiceType::Heartbeat, &message)
            .await
    }

    /// Returns the session state for `addr`, if a session exists.
    #[must_use]
    pub fn session_state(&self, addr: SocketAddr) -> Option<SessionState> {
        self.inner.sessions.get(&addr).map(|s| s.state())
    }

    /// Returns the peer device label for a ready session.
    #[must_use]
    pub fn remote_device_id(&self, addr: SocketAddr) -> Option<String> {
        self.inner
            .sessions
            .get(&addr)
            .and_then(|s| s.remote_device_id().map(str::to_string))
    }

    /// Returns the addresses of all sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<SocketAddr> {
        self.inner.sessions.iter().map(|s| *s.key()).collect()
    }

    /// Closes the session with `addr`. Unknown peers are ignored.
    pub fn close(&self, addr: SocketAddr) {
        self.inner.remove_session(addr);
    }

    /// Closes every session and stops the socket.
    ///
    /// # Errors
    /// Returns `Transport` if the socket cannot be shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let peers: Vec<SocketAddr> = self.sessions();
        for addr in peers {
            self.inner.remove_session(addr);
        }
        self.inner.transport.shutdown().await?;
        info!("Direct-auth manager stopped");
        Ok(())
    }
}

impl Drop for DirectSessionManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for DirectSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSessionManager")
            .field("local_addr", &self.inner.transport.local_addr().ok())
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Receive Side
// ============================================

impl Inner {
    fn publish(&self, event: NodeEvent) {
        trace!(event = event.kind(), "Publishing node event");
        let _ = self.events.send(event);
    }

    async fn send_service<T: serde::Serialize>(
        &self,
        addr: SocketAddr,
        service: ServiceType,
        body: &T,
    ) -> Result<()> {
        let datagram = encode_service(service, body)?;
        self.transport.send(&datagram, &addr).await?;
        trace!(peer = %addr, service = %service, len = datagram.len(), "Datagram sent");
        Ok(())
    }

    fn remove_session(&self, addr: SocketAddr) {
        if let Some((_, mut session)) = self.sessions.remove(&addr) {
            session.fail(NodeError::ConnectionClosed);
            info!(peer = %addr, device_id = ?session.remote_device_id(), "Session closed");
        }
    }

    fn spawn_recv_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
            loop {
                match self.transport.recv(&mut buf).await {
                    Ok((len, source)) => self.handle_datagram(&buf[..len], source.addr).await,
                    Err(TransportError::ShuttingDown) => break,
                    Err(e) if e.is_fatal() => {
                        warn!(error = %e, "Receive loop stopping");
                        break;
                    }
                    Err(e) => debug!(error = %e, "Receive error"),
                }
            }
            debug!("Direct-auth receive loop exiting");
        })
    }

    fn spawn_idle_sweep(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.heartbeat.interval();
        let idle_timeout = self.config.heartbeat.idle_timeout();
        tokio::spawn(async move {
            let mut ticker = interval_at(TokioInstant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let idle: Vec<SocketAddr> = self
                    .sessions
                    .iter()
                    .filter(|s| s.idle_time() > idle_timeout)
                    .map(|s| *s.key())
                    .collect();
                for addr in idle {
                    debug!(peer = %addr, "Session idle; closing");
                    self.remove_session(addr);
                }
            }
        })
    }

    async fn handle_datagram(&self, data: &[u8], remote: SocketAddr) {
        let (service, body) = match decode_service(data) {
            Ok(parts) => parts,
            Err(e) if e.is_unknown_type() => {
                debug!(peer = %remote, error = %e, "Unknown service type ignored");
                return;
            }
            Err(e) => {
                debug!(peer = %remote, error = %e, "Dropping malformed datagram");
                return;
            }
        };

        if let Some(mut session) = self.sessions.get_mut(&remote) {
            session.touch();
        }

        match service {
            ServiceType::VcExchange => match parse_body::<VcMessage>(body) {
                Ok(message) => self.handle_exchange(message, remote).await,
                Err(e) => debug!(peer = %remote, error = %e, "Malformed VC_EXCHANGE body"),
            },
            ServiceType::Discovery => match parse_body::<DiscoveryAnnouncement>(body) {
                Ok(announcement) => {
                    debug!(peer = %remote, device_id = %announcement.device_id, "Discovery announcement");
                    self.publish(NodeEvent::Discovery {
                        device_id: announcement.device_id,
                        public_key_hex: announcement.public_key_hex,
                        remote,
                    });
                }
                Err(e) => debug!(peer = %remote, error = %e, "Malformed DISCOVERY body"),
            },
            ServiceType::Heartbeat => match parse_body::<HeartbeatMessage>(body) {
                Ok(heartbeat) => {
                    trace!(peer = %remote, device_id = %heartbeat.device_id, "Heartbeat");
                }
                Err(e) => debug!(peer = %remote, error = %e, "Malformed HEARTBEAT body"),
            },
            ServiceType::Data => self.handle_data(body, remote),
        }
    }

    fn handle_data(&self, body: &[u8], remote: SocketAddr) {
        let device_id = match self.sessions.get(&remote).map(|s| s.ensure_ready().map(str::to_string)) {
            Some(Ok(device_id)) => device_id,
            _ => {
                debug!(peer = %remote, "DATA from peer without a ready session dropped");
                return;
            }
        };

        let payload = match parse_body::<DataMessage>(body)
            .map_err(|e| e.to_string())
            .and_then(|m| BASE64.decode(m.data).map_err(|e| e.to_string()))
        {
            Ok(payload) => payload,
            Err(e) => {
                debug!(peer = %remote, error = %e, "Malformed DATA body");
                return;
            }
        };

        trace!(peer = %remote, len = payload.len(), "Session data");
        self.publish(NodeEvent::DirectData {
            device_id,
            remote,
            payload: Bytes::from(payload),
        });
    }

    /// Decides whether `message` from `remote` may touch session state.
    ///
    /// Requests open (or join) a session. Responses are only taken on a
    /// session with our own request in flight; acks and errors need an
    /// existing session.
    fn admit(&self, message: &VcMessage, remote: SocketAddr) -> bool {
        match message {
            VcMessage::Request { .. } => {
                let mut session = self
                    .sessions
                    .entry(remote)
                    .or_insert_with(|| DirectSession::new(remote));
                if session.state() != SessionState::Ready {
                    session.begin_authentication();
                }
                true
            }
            VcMessage::Response { .. } => self
                .sessions
                .get(&remote)
                .is_some_and(|s| s.state() == SessionState::Authenticating && s.awaiting_response()),
            VcMessage::Ack { .. } | VcMessage::Error { .. } => self.sessions.contains_key(&remote),
        }
    }

    async fn handle_exchange(&self, message: VcMessage, remote: SocketAddr) {
        trace!(peer = %remote, kind = message.kind(), "VC exchange message");

        if !self.admit(&message, remote) {
            debug!(peer = %remote, kind = message.kind(), "Unsolicited exchange message dropped");
            return;
        }

        let step = handle_message(&self.engine, message);
        let mut follow_up = None;

        match step.event {
            Some(ExchangeEvent::PeerVerified(peer)) => {
                let ready = self
                    .sessions
                    .get_mut(&remote)
                    .is_some_and(|mut s| s.mark_verified(&peer.device_id));
                if !ready {
                    debug!(peer = %remote, device_id = %peer.device_id, "Session moved on before verification");
                    return;
                }
                info!(peer = %remote, device_id = %peer.device_id, trust_level = %peer.trust_level, "Session ready");
                self.publish(NodeEvent::AuthenticationComplete {
                    device_id: peer.device_id.clone(),
                    remote,
                });
                self.publish(NodeEvent::PeerAuthenticated(peer));
            }
            Some(ExchangeEvent::Completed { device_id }) => {
                let reverse = {
                    let Some(mut session) = self.sessions.get_mut(&remote) else {
                        return;
                    };
                    if session.has_verified(&device_id) {
                        false
                    } else if session.state() == SessionState::Authenticating && !session.awaiting_response() {
                        session.request_sent();
                        true
                    } else {
                        debug!(peer = %remote, device_id = %device_id, state = %session.state(), "Unexpected vc_ack ignored");
                        return;
                    }
                };
                debug!(peer = %remote, device_id = %device_id, "Peer accepted our credential");
                self.publish(NodeEvent::AuthenticationComplete {
                    device_id: device_id.clone(),
                    remote,
                });
                if reverse {
                    debug!(peer = %remote, device_id = %device_id, "Starting reverse exchange");
                    follow_up = Some(start_exchange(&self.engine));
                }
            }
            Some(ExchangeEvent::Failed { reason }) => {
                let error = if step.reply.is_some() {
                    NodeError::AuthenticationFailed {
                        reason: reason.clone(),
                    }
                } else {
                    NodeError::PeerRejected {
                        reason: reason.clone(),
                    }
                };
                if let Some(mut session) = self.sessions.get_mut(&remote) {
                    session.fail(error);
                }
                warn!(peer = %remote, reason = %reason, "Credential exchange failed");
                self.publish(NodeEvent::AuthenticationError { reason, remote });
            }
            None => {}
        }

        for reply in step.reply.into_iter().chain(follow_up) {
            if let Err(e) = self.send_service(remote, ServiceType::VcExchange, &reply).await {
                warn!(peer = %remote, kind = reply.kind(), error = %e, "Exchange reply failed");
                self.publish(NodeEvent::AuthenticationError {
                    reason: e.to_string(),
                    remote,
                });
            }
        }
    }
}
