// ============================================
// File: crates/quicvc-node/src/connection/state.rs
// ============================================
//! # Connection State
//!
//! ## Creation Reason
//! Holds everything one QUICVC connection owns: its IDs, state, packet
//! counters, credentials and derived keys.
//!
//! ## Main Functionality
//! - `ConnectionState`: the four-state machine
//! - `ReplayWindow`: sliding-window duplicate detection for packet numbers
//! - `Connection`: per-connection data plus packet building
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────┐  connect()  ┌───────────┐  VC_RESPONSE ok  ┌─────────────┐
//! │ Initial │ ──────────► │ Handshake │ ───────────────► │ Established │
//! └────┬────┘             └─────┬─────┘                  └──────┬──────┘
//!      │                        │                               │
//!      └────────────────────────┴─── close / timeout / error ───┘
//!                                          │
//!                                          ▼
//!                                    ┌──────────┐
//!                                    │  Closed  │
//!                                    └──────────┘
//! ```
//!
//! ## Replay Detection Algorithm (Sliding Window)
//! ```text
//! Window size: 2048 packet numbers
//!
//! Accept conditions:
//! 1. pn > highest_seen → Accept, advance window
//! 2. pn >= window_base AND not in bitmap → Accept, mark in bitmap
//! 3. pn < window_base → Reject (too old)
//! 4. pn in bitmap → Reject (replay)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Mutable fields live behind one `parking_lot::Mutex` per connection;
//!   never hold it across an `.await`
//! - Packet numbers come from an `AtomicU64` and are never reused
//! - Record a packet number in the replay window only AFTER it opened
//!
//! ## Last Modified
//! v0.1.0 - Initial connection state

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use quicvc_common::time::{AtomicInstant, Timestamp};
use quicvc_common::types::{Challenge, ConnectionId};
use quicvc_core::credential::Credential;
use quicvc_core::crypto::{CryptoKeys, PacketProtection};
use quicvc_core::protocol::codec::encode_header;
use quicvc_core::protocol::{encode_frames, encode_packet, Frame, PacketHeader, PacketType};
use quicvc_transport::Transport;

use crate::error::{NodeError, Result};
use crate::events::ConnectionEvent;

// ============================================
// Replay Window Constants
// ============================================

/// Size of the replay window in packets.
const REPLAY_WINDOW_SIZE: u64 = 2048;

/// Size of bitmap in u64 words (2048 / 64 = 32)
const BITMAP_WORDS: usize = (REPLAY_WINDOW_SIZE / 64) as usize;

/// Stream used by `send()`.
pub const DEFAULT_STREAM_ID: u64 = 0;

// ============================================
// ConnectionState
// ============================================

/// Connection state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, nothing sent yet.
    Initial,
    /// `INITIAL` sent (initiator) or answered (responder).
    Handshake,
    /// Keys derived; `send()` allowed.
    Established,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initial, Self::Handshake)
                | (Self::Handshake, Self::Established)
                | (Self::Initial | Self::Handshake | Self::Established, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Handshake => write!(f, "handshake"),
            Self::Established => write!(f, "established"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Sent `INITIAL`; owns its socket.
    Initiator,
    /// Answered `INITIAL`; shares the listener socket.
    Responder,
}

// ============================================
// Replay Window (Sliding Window Anti-Replay)
// ============================================

/// Result of replay check operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheckResult {
    /// Packet number is new and has been recorded.
    Accept,
    /// Packet number is ahead of the window; window advanced.
    AcceptAndAdvance,
    /// Packet number was already seen.
    Replay,
    /// Packet number is before the window.
    TooOld,
}

impl ReplayCheckResult {
    /// Returns `true` for either accepting outcome.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accept | Self::AcceptAndAdvance)
    }
}

/// Sliding window over received packet numbers.
pub struct ReplayWindow {
    /// Highest packet number seen so far.
    highest_seen: u64,
    /// Whether any packet number has been recorded.
    seen_any: bool,
    /// Bit at position (pn % WINDOW_SIZE) set when pn was seen.
    bitmap: [u64; BITMAP_WORDS],
}

impl ReplayWindow {
    /// Creates an empty window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            highest_seen: 0,
            seen_any: false,
            bitmap: [0u64; BITMAP_WORDS],
        }
    }

    /// Checks a packet number and records it if new.
    pub fn check_and_record(&mut self, pn: u64) -> ReplayCheckResult {
        if !self.seen_any {
            self.seen_any = true;
            self.highest_seen = pn;
            self.set_bit(pn);
            return ReplayCheckResult::AcceptAndAdvance;
        }

        if pn > self.highest_seen {
            let advance = pn - self.highest_seen;

            if advance >= REPLAY_WINDOW_SIZE {
                self.bitmap = [0u64; BITMAP_WORDS];
            } else {
                for i in 1..=advance {
                    self.clear_bit(self.highest_seen + i);
                }
            }

            self.highest_seen = pn;
            self.set_bit(pn);
            return ReplayCheckResult::AcceptAndAdvance;
        }

        if pn < self.window_base() {
            return ReplayCheckResult::TooOld;
        }

        if self.get_bit(pn) {
            return ReplayCheckResult::Replay;
        }

        self.set_bit(pn);
        ReplayCheckResult::Accept
    }

    #[inline]
    fn locate(pn: u64) -> (usize, u64) {
        #[allow(clippy::cast_possible_truncation)]
        let bit_index = (pn % REPLAY_WINDOW_SIZE) as usize;
        (bit_index / 64, 1u64 << (bit_index % 64))
    }

    #[inline]
    fn get_bit(&self, pn: u64) -> bool {
        let (word, mask) = Self::locate(pn);
        self.bitmap[word] & mask != 0
    }

    #[inline]
    fn set_bit(&mut self, pn: u64) {
        let (word, mask) = Self::locate(pn);
        self.bitmap[word] |= mask;
    }

    #[inline]
    fn clear_bit(&mut self, pn: u64) {
        let (word, mask) = Self::locate(pn);
        self.bitmap[word] &= !mask;
    }

    /// Returns the highest packet number seen, if any.
    #[must_use]
    pub const fn highest_seen(&self) -> Option<u64> {
        if self.seen_any {
            Some(self.highest_seen)
        } else {
            None
        }
    }

    /// Returns the oldest packet number still inside the window.
    #[must_use]
    pub const fn window_base(&self) -> u64 {
        self.highest_seen.saturating_sub(REPLAY_WINDOW_SIZE - 1)
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReplayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayWindow")
            .field("highest_seen", &self.highest_seen())
            .field("window_base", &self.window_base())
            .finish()
    }
}

// ============================================
// Connection
// ============================================

struct ConnectionInner {
    state: ConnectionState,
    /// Peer's connection ID; replaced by the server's SCID on `HANDSHAKE`.
    dcid: ConnectionId,
    challenge: Challenge,
    keys: Option<CryptoKeys>,
    local_credential: Credential,
    remote_credential: Option<Credential>,
    replay: ReplayWindow,
    handshake_waiter: Option<oneshot::Sender<Result<String>>>,
}

/// One QUICVC connection.
///
/// Owned by a connection table; callers address it by [`ConnectionId`].
pub struct Connection {
    /// Local SCID, also the table key.
    id: ConnectionId,
    role: ConnectionRole,
    remote_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    inner: Mutex<ConnectionInner>,
    next_packet_number: AtomicU64,
    stream_offset: AtomicU64,
    heartbeat_sequence: AtomicU64,
    last_activity: AtomicInstant,
    created_at: Instant,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Material a responder has once it has verified a `VC_INIT`.
pub(crate) struct ResponderParams {
    pub peer_cid: ConnectionId,
    pub remote_addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    pub local_credential: Credential,
    pub remote_credential: Credential,
    pub keys: CryptoKeys,
}

impl Connection {
    /// Creates the initiator side with fresh IDs and challenge.
    pub(crate) fn initiator(
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        local_credential: Credential,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> (Self, oneshot::Receiver<Result<String>>) {
        let (waiter_tx, waiter_rx) = oneshot::channel();
        let now = Instant::now();
        let connection = Self {
            id: ConnectionId::generate(),
            role: ConnectionRole::Initiator,
            remote_addr,
            transport,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Initial,
                dcid: ConnectionId::generate(),
                challenge: Challenge::generate(),
                keys: None,
                local_credential,
                remote_credential: None,
                replay: ReplayWindow::new(),
                handshake_waiter: Some(waiter_tx),
            }),
            next_packet_number: AtomicU64::new(0),
            stream_offset: AtomicU64::new(0),
            heartbeat_sequence: AtomicU64::new(0),
            last_activity: AtomicInstant::from_instant(now),
            created_at: now,
            events,
        };
        (connection, waiter_rx)
    }

    /// Creates the responder side, already in `Handshake` with keys.
    pub(crate) fn responder(
        params: ResponderParams,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::generate(),
            role: ConnectionRole::Responder,
            remote_addr: params.remote_addr,
            transport: params.transport,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Handshake,
                dcid: params.peer_cid,
                challenge: Challenge::generate(),
                keys: Some(params.keys),
                local_credential: params.local_credential,
                remote_credential: Some(params.remote_credential),
                replay: ReplayWindow::new(),
                handshake_waiter: None,
            }),
            next_packet_number: AtomicU64::new(0),
            stream_offset: AtomicU64::new(0),
            heartbeat_sequence: AtomicU64::new(0),
            last_activity: AtomicInstant::from_instant(now),
            created_at: now,
            events,
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Returns the local connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns which side opened the connection.
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Returns the remote address.
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Returns the peer's connection ID.
    #[must_use]
    pub fn dcid(&self) -> ConnectionId {
        self.inner.lock().dcid
    }

    /// Returns the handshake challenge.
    #[must_use]
    pub fn challenge(&self) -> Challenge {
        self.inner.lock().challenge
    }

    /// Returns the local credential presented in the handshake.
    #[must_use]
    pub fn local_credential(&self) -> Credential {
        self.inner.lock().local_credential.clone()
    }

    /// Returns the peer's credential once known.
    #[must_use]
    pub fn remote_credential(&self) -> Option<Credential> {
        self.inner.lock().remote_credential.clone()
    }

    /// Returns the peer's device label once known.
    #[must_use]
    pub fn remote_device_id(&self) -> Option<String> {
        self.inner
            .lock()
            .remote_credential
            .as_ref()
            .map(|c| c.device_id().to_string())
    }

    /// Returns `true` once application keys exist.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        self.inner.lock().keys.is_some()
    }

    /// Returns the highest packet number received under protection.
    #[must_use]
    pub fn highest_received_packet(&self) -> Option<u64> {
        self.inner.lock().replay.highest_seen()
    }

    /// Returns how many packets have been sent.
    #[must_use]
    pub fn packets_sent(&self) -> u64 {
        self.next_packet_number.load(Ordering::Relaxed)
    }

    /// Returns the time since any packet arrived.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.has_elapsed(timeout)
    }

    /// Returns the connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn touch(&self) {
        self.last_activity.touch();
    }

    pub(crate) fn next_heartbeat_sequence(&self) -> u64 {
        self.heartbeat_sequence.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================
    // State Transitions
    // ========================================

    /// Moves to `next` if the transition is legal.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        Self::transition_locked(self.id, &mut inner, next)
    }

    fn transition_locked(id: ConnectionId, inner: &mut ConnectionInner, next: ConnectionState) -> bool {
        if !inner.state.can_transition_to(next) {
            debug!(connection = %id, from = %inner.state, to = %next, "Ignoring state transition");
            return false;
        }
        trace!(connection = %id, from = %inner.state, to = %next, "State transition");
        inner.state = next;
        true
    }

    /// Initiator: records the server's identity and keys, wakes `connect()`.
    ///
    /// Returns `false` if the connection was not waiting for a handshake.
    pub(crate) fn complete_handshake(
        &self,
        server_cid: ConnectionId,
        remote_credential: Credential,
        keys: CryptoKeys,
    ) -> bool {
        let device_id = remote_credential.device_id().to_string();
        let waiter = {
            let mut inner = self.inner.lock();
            if !Self::transition_locked(self.id, &mut inner, ConnectionState::Established) {
                return false;
            }
            inner.dcid = server_cid;
            inner.keys = Some(keys);
            inner.remote_credential = Some(remote_credential);
            inner.handshake_waiter.take()
        };

        info!(connection = %self.id, device_id = %device_id, peer = %self.remote_addr, "Connection established");
        self.emit(ConnectionEvent::Connected {
            device_id: device_id.clone(),
        });
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(device_id));
        }
        true
    }

    /// Responder: first authenticated packet arrived.
    ///
    /// Returns the peer's device label if this call made the transition.
    pub(crate) fn mark_established(&self) -> Option<String> {
        let device_id = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Handshake
                || !Self::transition_locked(self.id, &mut inner, ConnectionState::Established)
            {
                return None;
            }
            inner
                .remote_credential
                .as_ref()
                .map(|c| c.device_id().to_string())
                .unwrap_or_default()
        };

        info!(connection = %self.id, device_id = %device_id, peer = %self.remote_addr, "Inbound connection established");
        self.emit(ConnectionEvent::Connected {
            device_id: device_id.clone(),
        });
        Some(device_id)
    }

    /// Fails a pending `connect()`.
    pub(crate) fn fail_handshake(&self, error: NodeError) {
        if let Some(waiter) = self.inner.lock().handshake_waiter.take() {
            let _ = waiter.send(Err(error));
        }
    }

    /// Moves to `Closed`, drops keys and ends the event stream.
    ///
    /// Returns `false` if it was already closed.
    pub(crate) fn mark_closed(&self, reason: Option<&str>) -> bool {
        let waiter = {
            let mut inner = self.inner.lock();
            if !Self::transition_locked(self.id, &mut inner, ConnectionState::Closed) {
                return false;
            }
            inner.keys = None;
            inner.handshake_waiter.take()
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(NodeError::ConnectionClosed));
        }
        if let Some(reason) = reason {
            self.emit(ConnectionEvent::Error {
                message: reason.to_string(),
            });
        }
        self.emit(ConnectionEvent::Closed);
        true
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // The receiver may be gone; events are best effort.
        let _ = self.events.send(event);
    }

    // ========================================
    // Packet Building
    // ========================================

    /// Frames the `VC_INIT` for this connection.
    pub(crate) fn initial_frames(&self) -> Vec<Frame> {
        let inner = self.inner.lock();
        vec![Frame::VcInit {
            credential: Box::new(inner.local_credential.clone()),
            challenge: inner.challenge,
            timestamp: Timestamp::now(),
        }]
    }

    /// Builds a complete datagram, sealing it when `PROTECTED`.
    ///
    /// # Errors
    /// - `NotEstablished` for `PROTECTED` before keys exist
    /// - `Core` if encoding or sealing fails
    pub(crate) fn build_packet(
        &self,
        packet_type: PacketType,
        frames: &[Frame],
        protection: &dyn PacketProtection,
    ) -> Result<BytesMut> {
        let payload = encode_frames(frames)?;

        let inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return Err(NodeError::ConnectionClosed);
        }
        let packet_number = self.next_packet_number.fetch_add(1, Ordering::Relaxed);
        let header = PacketHeader::for_connection(packet_type, &inner.dcid, &self.id, packet_number);

        if packet_type == PacketType::Protected {
            let keys = inner.keys.as_ref().ok_or(NodeError::NotEstablished(self.id))?;
            let header_bytes = encode_header(&header);
            let sealed = protection.seal(keys, packet_number, &header_bytes, &payload)?;
            drop(inner);
            Ok(encode_packet(&header, &sealed)?)
        } else {
            drop(inner);
            Ok(encode_packet(&header, &payload)?)
        }
    }

    /// Builds and sends a packet.
    ///
    /// Socket failures are also reported on the event stream; they do
    /// not close the connection.
    ///
    /// # Errors
    /// See [`Connection::build_packet`]; plus `Transport` on send failure.
    pub(crate) async fn send_frames(
        &self,
        packet_type: PacketType,
        frames: &[Frame],
        protection: &dyn PacketProtection,
    ) -> Result<()> {
        let packet = self.build_packet(packet_type, frames, protection)?;
        if let Err(e) = self.transport.send(&packet, &self.remote_addr).await {
            warn!(connection = %self.id, peer = %self.remote_addr, error = %e, "Send failed");
            self.emit(ConnectionEvent::Error {
                message: e.to_string(),
            });
            return Err(e.into());
        }
        trace!(connection = %self.id, packet_type = %packet_type, len = packet.len(), "Packet sent");
        Ok(())
    }

    /// Sends `data` on the default stream.
    ///
    /// # Errors
    /// `NotEstablished` unless the handshake has completed.
    pub(crate) async fn send_stream(&self, data: &[u8], protection: &dyn PacketProtection) -> Result<()> {
        if !self.is_established() {
            return Err(NodeError::NotEstablished(self.id));
        }
        let offset = self
            .stream_offset
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        let frame = Frame::Stream {
            stream_id: DEFAULT_STREAM_ID,
            offset,
            data: data.to_vec(),
        };
        self.send_frames(PacketType::Protected, &[frame], protection)
            .await
    }

    /// Opens a `PROTECTED` payload and records its packet number.
    ///
    /// # Errors
    /// - `NotEstablished` if no keys exist
    /// - `Core(Decryption)` if authentication fails
    /// - `Core(MalformedMessage)` for replayed or stale packet numbers
    pub(crate) fn open_protected(
        &self,
        packet_number: u64,
        header_bytes: &[u8],
        payload: &[u8],
        protection: &dyn PacketProtection,
    ) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let keys = inner.keys.as_ref().ok_or(NodeError::NotEstablished(self.id))?;
        let plaintext = protection.open(keys, packet_number, header_bytes, payload)?;

        let verdict = inner.replay.check_and_record(packet_number);
        if !verdict.is_accepted() {
            return Err(quicvc_core::CoreError::malformed(format!(
                "packet number {packet_number} rejected: {verdict:?}"
            ))
            .into());
        }
        Ok(plaintext)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote_addr", &self.remote_addr)
            .field("state", &inner.state)
            .field("dcid", &inner.dcid)
            .field("packets_sent", &self.packets_sent())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use quicvc_core::credential::CredentialEngine;
    use quicvc_core::crypto::{derive_crypto_keys, ChaChaPacketProtection};
    use quicvc_core::protocol::parse_packet;
    use quicvc_transport::UdpTransport;

    use super::*;

    #[test]
    fn test_state_transitions() {
        use ConnectionState::{Closed, Established, Handshake, Initial};

        assert!(Initial.can_transition_to(Handshake));
        assert!(Handshake.can_transition_to(Established));
        assert!(Established.can_transition_to(Closed));
        assert!(Initial.can_transition_to(Closed));

        assert!(!Initial.can_transition_to(Established));
        assert!(!Established.can_transition_to(Handshake));
        assert!(!Closed.can_transition_to(Initial));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn test_replay_window_sequential() {
        let mut window = ReplayWindow::new();
        assert_eq!(window.highest_seen(), None);

        for pn in 0..100 {
            assert!(window.check_and_record(pn).is_accepted());
        }
        assert_eq!(window.highest_seen(), Some(99));
    }

    #[test]
    fn test_replay_window_rejects_duplicates() {
        let mut window = ReplayWindow::new();
        assert!(window.check_and_record(0).is_accepted());
        assert_eq!(window.check_and_record(0), ReplayCheckResult::Replay);

        assert!(window.check_and_record(5).is_accepted());
        assert_eq!(window.check_and_record(3), ReplayCheckResult::Accept);
        assert_eq!(window.check_and_record(3), ReplayCheckResult::Replay);
    }

    #[test]
    fn test_replay_window_too_old() {
        let mut window = ReplayWindow::new();
        window.check_and_record(10_000);
        assert_eq!(window.check_and_record(1), ReplayCheckResult::TooOld);
        assert_eq!(window.window_base(), 10_000 - REPLAY_WINDOW_SIZE + 1);
    }

    #[test]
    fn test_replay_window_big_jump_clears_bitmap() {
        let mut window = ReplayWindow::new();
        window.check_and_record(1);
        window.check_and_record(1 + REPLAY_WINDOW_SIZE * 3);
        // Same bit slot as 1, but a different packet number inside the window.
        assert!(window
            .check_and_record(1 + REPLAY_WINDOW_SIZE * 2 + 1)
            .is_accepted());
    }

    async fn test_connection() -> (Connection, mpsc::UnboundedReceiver<ConnectionEvent>, oneshot::Receiver<Result<String>>) {
        let engine = CredentialEngine::new("local");
        let credential = engine.create_self_signed_credential().unwrap();
        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn, waiter) = Connection::initiator("127.0.0.1:9".parse().unwrap(), transport, credential, tx);
        (conn, rx, waiter)
    }

    #[tokio::test]
    async fn test_initiator_starts_initial() {
        let (conn, _rx, _waiter) = test_connection().await;
        assert_eq!(conn.state(), ConnectionState::Initial);
        assert_eq!(conn.role(), ConnectionRole::Initiator);
        assert!(!conn.has_keys());
        assert_ne!(conn.id(), conn.dcid());
    }

    #[tokio::test]
    async fn test_initial_packet_layout() {
        let (conn, _rx, _waiter) = test_connection().await;
        let protection = ChaChaPacketProtection::new();

        let packet = conn
            .build_packet(PacketType::Initial, &conn.initial_frames(), &protection)
            .unwrap();
        let parsed = parse_packet(&packet).unwrap();
        assert_eq!(parsed.header.packet_type(), PacketType::Initial);
        assert_eq!(parsed.header.scid_id(), Some(conn.id()));
        assert_eq!(parsed.header.dcid_id(), Some(conn.dcid()));
        assert_eq!(parsed.header.packet_number(), 0);
        assert_eq!(conn.packets_sent(), 1);
    }

    #[tokio::test]
    async fn test_protected_requires_keys() {
        let (conn, _rx, _waiter) = test_connection().await;
        let protection = ChaChaPacketProtection::new();
        let result = conn.build_packet(PacketType::Protected, &[Frame::Ack { largest: 0 }], &protection);
        assert!(matches!(result, Err(NodeError::NotEstablished(_))));

        let result = conn.send_stream(b"early", &protection).await;
        assert!(matches!(result, Err(NodeError::NotEstablished(_))));
    }

    #[tokio::test]
    async fn test_responder_generates_own_challenge() {
        let server = CredentialEngine::new("server");
        let client = CredentialEngine::new("client");
        let (initiator, _rx, _waiter) = test_connection().await;
        let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());
        let (tx, _events) = mpsc::unbounded_channel();

        let make = || {
            Connection::responder(
                ResponderParams {
                    peer_cid: initiator.id(),
                    remote_addr: "127.0.0.1:9".parse().unwrap(),
                    transport: Arc::clone(&transport),
                    local_credential: server.create_self_signed_credential().unwrap(),
                    remote_credential: client.create_self_signed_credential().unwrap(),
                    keys: derive_crypto_keys(server.encryption_keys(), &client.public_key_hex()).unwrap(),
                },
                tx.clone(),
            )
        };
        let first = make();
        let second = make();

        assert_eq!(first.state(), ConnectionState::Handshake);
        assert!(first.has_keys());
        assert!(first.challenge() != initiator.challenge());
        assert!(first.challenge() != second.challenge());
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_wakes_waiter() {
        let (conn, mut rx, waiter) = test_connection().await;
        assert!(conn.transition(ConnectionState::Handshake));

        assert!(conn.mark_closed(Some("boom")));
        assert!(!conn.mark_closed(None));
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert!(matches!(waiter.await.unwrap(), Err(NodeError::ConnectionClosed)));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Error { message: "boom".into() }));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Closed));
    }
}
