// ============================================
// File: crates/quicvc-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the QUICVC wire protocol: binary packet headers, the frames
//! carried inside them, and the simpler service-byte framing used by
//! direct-auth sessions.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`codec`]: Packet header encoding/parsing
//! - [`frames`]: Frame types and payload encoding
//! - [`service`]: Service-byte framing (`DISCOVERY`, `DATA`, `HEARTBEAT`, `VC_EXCHANGE`)
//! - [`version`]: Protocol versioning
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │                                                             │
//! │  Client ──────── INITIAL   [VC_INIT] ──────────────► Server │
//! │  Client ◄─────── HANDSHAKE [VC_RESPONSE] ────────── Server │
//! │                                                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Protected Phase                          │
//! │                                                             │
//! │  Client ══════ PROTECTED [ACK | STREAM | HEARTBEAT] ═ Server │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian multi-byte integers in the header
//! - One datagram carries exactly one packet
//! - Frame payloads are JSON
//!
//! ## ⚠️ Important Note for Next Developer
//! - ANY header change requires a version bump
//! - Malformed packets are dropped without a reply
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod frames;
pub mod service;
pub mod version;

pub use codec::{
    encode_packet, parse_packet, Codec, HeaderCodec, PacketHeader, PacketType, ParsedPacket,
    HEADER_FIXED_SIZE,
};
pub use frames::{decode_frames, encode_frames, Frame, FrameType};
pub use service::{decode_service, encode_service, parse_body, ServiceType};
pub use version::{ProtocolVersion, CURRENT_PROTOCOL_VERSION};
