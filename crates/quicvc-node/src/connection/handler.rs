// ============================================
// File: crates/quicvc-node/src/connection/handler.rs
// ============================================
//! # Packet Handler
//!
//! ## Creation Reason
//! Turns inbound datagrams into state changes and events for both the
//! dialing side and the listening side.
//!
//! ## Packet Processing
//!
//! ### Listener: INITIAL
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Parse header, check version                             │
//! │  2. Find VC_INIT, check timestamp freshness                 │
//! │  3. Verify credential (structure → expiry → signature)      │
//! │  4. Derive keys from credentialSubject.publicKeyHex         │
//! │  5. New responder connection, DCID = client SCID            │
//! │  6. Reply HANDSHAKE [VC_RESPONSE(echoed challenge)]         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Initiator: HANDSHAKE
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Lookup connection by DCID, must be in Handshake         │
//! │  2. VC_RESPONSE must echo our challenge                     │
//! │  3. Verify server credential, derive keys                   │
//! │  4. Adopt server SCID as DCID → Established                 │
//! │  5. Reply PROTECTED [ACK, VC_ACK]                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Both: PROTECTED
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1. Lookup connection by DCID                               │
//! │  2. Open payload (AAD = header bytes), then replay check    │
//! │  3. Responder: first authenticated packet → Established     │
//! │  4. STREAM → Data, HEARTBEAT → reply with ack               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Malformed or unexpected packets are dropped, never answered
//! - Log security events but avoid log flooding: per-packet drops are
//!   `debug!`, authentication failures are `warn!`
//!
//! ## Last Modified
//! v0.1.0 - Initial packet handler

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use quicvc_common::time::{Timestamp, MAX_CLOCK_SKEW_MS};
use quicvc_common::types::ConnectionId;
use quicvc_core::crypto::derive_crypto_keys;
use quicvc_core::protocol::{decode_frames, parse_packet, Frame, PacketType, ParsedPacket};
use quicvc_transport::{Transport, TransportError, MAX_UDP_PAYLOAD};

use crate::connection::context::ConnectionContext;
use crate::connection::state::{Connection, ConnectionRole, ConnectionState, ResponderParams};
use crate::error::NodeError;
use crate::events::{ConnectionEvent, NodeEvent};

/// Dispatches datagrams from one socket.
pub(crate) struct PacketHandler {
    ctx: Arc<ConnectionContext>,
    transport: Arc<dyn Transport>,
    accepts_initial: bool,
}

impl PacketHandler {
    /// Handler for an initiator's private socket.
    pub(crate) fn initiator(ctx: Arc<ConnectionContext>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx,
            transport,
            accepts_initial: false,
        }
    }

    /// Handler for the listener socket.
    pub(crate) fn listener(ctx: Arc<ConnectionContext>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx,
            transport,
            accepts_initial: true,
        }
    }

    /// Runs the receive loop until the socket shuts down.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
            loop {
                match self.transport.recv(&mut buf).await {
                    Ok((len, source)) => {
                        trace!(peer = %source.addr, len, "Datagram received");
                        self.handle_datagram(&buf[..len], source.addr).await;
                    }
                    Err(TransportError::ShuttingDown) => {
                        debug!("Receive loop received shutdown signal");
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(error = %e, "Receive loop stopping");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "Receive error");
                    }
                }
            }
            debug!("Receive loop exiting");
        })
    }

    /// Handles one datagram. Never fails; bad input is dropped.
    pub(crate) async fn handle_datagram(&self, data: &[u8], remote: SocketAddr) {
        let packet = match parse_packet(data) {
            Ok(packet) => packet,
            Err(e) if e.is_unknown_type() => {
                debug!(peer = %remote, error = %e, "Ignoring unknown packet type");
                return;
            }
            Err(e) => {
                trace!(peer = %remote, len = data.len(), error = %e, "Dropping malformed packet");
                return;
            }
        };

        if !packet.header.version().is_supported() {
            debug!(
                peer = %remote,
                version = packet.header.version().as_u32(),
                "Dropping packet with unsupported version"
            );
            return;
        }

        match packet.header.packet_type() {
            PacketType::Initial if self.accepts_initial => self.handle_initial(&packet, remote).await,
            PacketType::Handshake => self.handle_handshake(&packet, remote).await,
            PacketType::Protected => self.handle_protected(&packet, remote).await,
            other => {
                debug!(peer = %remote, packet_type = %other, "Ignoring packet type");
            }
        }
    }

    // ========================================
    // INITIAL (listener)
    // ========================================

    async fn handle_initial(&self, packet: &ParsedPacket<'_>, remote: SocketAddr) {
        let Some(client_cid) = packet.header.scid_id() else {
            debug!(peer = %remote, "INITIAL without a usable SCID");
            return;
        };

        if self.ctx.find_by_peer(remote, client_cid).is_some() {
            debug!(peer = %remote, client_cid = %client_cid, "Duplicate INITIAL ignored");
            return;
        }

        let frames = match decode_frames(packet.payload) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(peer = %remote, error = %e, "Malformed INITIAL payload");
                return;
            }
        };

        let Some((credential, challenge, timestamp)) = frames.into_iter().find_map(|f| match f {
            Frame::VcInit {
                credential,
                challenge,
                timestamp,
            } => Some((credential, challenge, timestamp)),
            _ => None,
        }) else {
            debug!(peer = %remote, "INITIAL without VC_INIT");
            return;
        };

        if !timestamp.is_recent(MAX_CLOCK_SKEW_MS) {
            warn!(
                peer = %remote,
                offset_ms = timestamp.offset_from_now(),
                "VC_INIT timestamp outside allowed skew"
            );
            return;
        }

        let peer = match self.ctx.engine.accept_credential(&credential) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(peer = %remote, error = %e, "Rejecting INITIAL credential");
                self.ctx.publish(NodeEvent::Error {
                    connection: None,
                    message: format!("credential from {remote} rejected: {e}"),
                });
                return;
            }
        };

        let keys = match derive_crypto_keys(self.ctx.engine.encryption_keys(), &peer.public_key_hex) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(peer = %remote, error = %e, "Key derivation failed");
                self.ctx.publish(NodeEvent::Error {
                    connection: None,
                    message: e.to_string(),
                });
                return;
            }
        };

        if self.ctx.check_capacity().is_err() {
            return;
        }

        let local_credential = match self.ctx.engine.ensure_local_credential() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "No local credential to answer with");
                return;
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::responder(
            ResponderParams {
                peer_cid: client_cid,
                remote_addr: remote,
                transport: Arc::clone(&self.transport),
                local_credential: local_credential.clone(),
                remote_credential: *credential,
                keys,
            },
            events_tx,
        ));
        let id = connection.id();
        self.ctx
            .insert_responder(Arc::clone(&connection), client_cid, events_rx);

        let reply = Frame::VcResponse {
            credential: Box::new(local_credential),
            challenge,
        };
        if let Err(e) = connection
            .send_frames(PacketType::Handshake, &[reply], self.ctx.protection.as_ref())
            .await
        {
            self.ctx.close(id, Some(&e.to_string())).await;
            return;
        }

        info!(
            connection = %id,
            peer = %remote,
            device_id = %peer.device_id,
            trust_level = %peer.trust_level,
            "Inbound handshake answered"
        );
        self.ctx.spawn_liveness(&connection);
        self.ctx.publish(NodeEvent::PeerAuthenticated(peer));
    }

    // ========================================
    // HANDSHAKE (initiator)
    // ========================================

    async fn handle_handshake(&self, packet: &ParsedPacket<'_>, remote: SocketAddr) {
        let Some(connection) = self.lookup(packet, remote) else {
            return;
        };
        if connection.role() != ConnectionRole::Initiator
            || connection.state() != ConnectionState::Handshake
        {
            debug!(connection = %connection.id(), state = %connection.state(), "Unexpected HANDSHAKE");
            return;
        }
        let Some(server_cid) = packet.header.scid_id() else {
            debug!(peer = %remote, "HANDSHAKE without a usable SCID");
            return;
        };

        let frames = match decode_frames(packet.payload) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(peer = %remote, error = %e, "Malformed HANDSHAKE payload");
                return;
            }
        };
        let Some((credential, challenge)) = frames.into_iter().find_map(|f| match f {
            Frame::VcResponse {
                credential,
                challenge,
            } => Some((credential, challenge)),
            _ => None,
        }) else {
            debug!(peer = %remote, "HANDSHAKE without VC_RESPONSE");
            return;
        };

        if challenge != connection.challenge() {
            warn!(connection = %connection.id(), peer = %remote, "VC_RESPONSE challenge mismatch");
            return;
        }

        let id = connection.id();
        let peer = match self.ctx.engine.accept_credential(&credential) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(connection = %id, peer = %remote, error = %e, "Server credential rejected");
                let reason = format!("server credential rejected: {e}");
                connection.fail_handshake(e.into());
                self.ctx.close(id, Some(&reason)).await;
                return;
            }
        };

        let keys = match derive_crypto_keys(self.ctx.engine.encryption_keys(), &peer.public_key_hex) {
            Ok(keys) => keys,
            Err(e) => {
                let reason = e.to_string();
                connection.fail_handshake(e.into());
                self.ctx.close(id, Some(&reason)).await;
                return;
            }
        };

        if !connection.complete_handshake(server_cid, *credential, keys) {
            return;
        }
        connection.touch();

        let frames = [
            Frame::Ack {
                largest: packet.header.packet_number(),
            },
            Frame::VcAck {
                device_id: self.ctx.engine.device_id().to_string(),
            },
        ];
        if let Err(e) = connection
            .send_frames(PacketType::Protected, &frames, self.ctx.protection.as_ref())
            .await
        {
            self.ctx.publish(NodeEvent::Error {
                connection: Some(id),
                message: e.to_string(),
            });
        }

        self.ctx.publish(NodeEvent::Connected {
            connection: id,
            device_id: peer.device_id.clone(),
            remote,
        });
        self.ctx.publish(NodeEvent::PeerAuthenticated(peer));
    }

    // ========================================
    // PROTECTED (both roles)
    // ========================================

    async fn handle_protected(&self, packet: &ParsedPacket<'_>, remote: SocketAddr) {
        let Some(connection) = self.lookup(packet, remote) else {
            return;
        };
        let id = connection.id();
        let packet_number = packet.header.packet_number();

        let plaintext = match connection.open_protected(
            packet_number,
            packet.header_bytes,
            packet.payload,
            self.ctx.protection.as_ref(),
        ) {
            Ok(plaintext) => plaintext,
            Err(NodeError::Core(e)) if e.is_suspicious() => {
                warn!(connection = %id, packet_number, error = %e, "PROTECTED packet failed authentication");
                return;
            }
            Err(NodeError::Core(e)) if e.is_protocol_error() => {
                debug!(connection = %id, packet_number, error = %e, "Duplicate or stale packet number");
                return;
            }
            Err(e) => {
                debug!(connection = %id, packet_number, error = %e, "Dropping PROTECTED packet");
                return;
            }
        };
        connection.touch();

        if connection.role() == ConnectionRole::Responder {
            if let Some(device_id) = connection.mark_established() {
                self.ctx.publish(NodeEvent::Connected {
                    connection: id,
                    device_id,
                    remote,
                });
                self.ctx.deliver_incoming(&connection);
            }
        }

        let frames = match decode_frames(&plaintext) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(connection = %id, error = %e, "Malformed PROTECTED payload");
                return;
            }
        };

        for frame in frames {
            self.handle_frame(&connection, frame).await;
        }
    }

    async fn handle_frame(&self, connection: &Arc<Connection>, frame: Frame) {
        let id = connection.id();
        match frame {
            Frame::Stream {
                stream_id, data, ..
            } => {
                let payload = Bytes::from(data);
                trace!(connection = %id, stream_id, len = payload.len(), "Stream data");
                connection.emit(ConnectionEvent::Data {
                    stream_id,
                    payload: payload.clone(),
                });
                self.ctx.publish(NodeEvent::Data {
                    connection: id,
                    device_id: connection.remote_device_id().unwrap_or_default(),
                    payload,
                });
            }
            Frame::Heartbeat {
                sequence,
                ack: false,
                ..
            } => {
                let reply = Frame::Heartbeat {
                    timestamp: Timestamp::now(),
                    sequence,
                    ack: true,
                };
                if let Err(e) = connection
                    .send_frames(PacketType::Protected, &[reply], self.ctx.protection.as_ref())
                    .await
                {
                    debug!(connection = %id, error = %e, "Heartbeat reply failed");
                }
            }
            Frame::Heartbeat {
                sequence,
                timestamp,
                ack: true,
            } => {
                trace!(
                    connection = %id,
                    sequence,
                    rtt_ms = timestamp.elapsed_millis(),
                    "Heartbeat acknowledged"
                );
            }
            Frame::Ack { largest } => {
                trace!(connection = %id, largest, "ACK received");
            }
            Frame::VcAck { device_id } => {
                debug!(connection = %id, device_id = %device_id, "Peer acknowledged our credential");
            }
            Frame::VcInit { .. } | Frame::VcResponse { .. } => {
                debug!(connection = %id, "Handshake frame inside PROTECTED ignored");
            }
            Frame::Unknown(frame_type) => {
                debug!(connection = %id, frame_type, "Unknown frame type ignored");
            }
        }
    }

    fn lookup(&self, packet: &ParsedPacket<'_>, remote: SocketAddr) -> Option<Arc<Connection>> {
        let dcid: Option<ConnectionId> = packet.header.dcid_id();
        let connection = dcid.and_then(|dcid| self.ctx.get(&dcid));
        if connection.is_none() {
            debug!(peer = %remote, packet_type = %packet.header.packet_type(), "No connection for DCID");
        }
        connection
    }
}
