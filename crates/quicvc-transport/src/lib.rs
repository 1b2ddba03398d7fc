// ============================================
// File: crates/quicvc-transport/src/lib.rs
// ============================================
//! # QUICVC Transport - Datagram I/O Layer
//!
//! ## Creation Reason
//! Isolates socket handling from protocol logic so the connection state
//! machine can be driven over any datagram transport.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Transport` trait and `PacketSource`
//! - [`udp`]: Tokio/socket2 UDP implementation
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 quicvc-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   quicvc-core           quicvc-transport            │
//! │                         You are here ◄──            │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │              quicvc-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One datagram is one QUICVC packet; never coalesce
//! - Always go through the trait so tests can swap implementations
//! - `shutdown()` must wake any task parked in `recv()`
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use traits::{PacketSource, Transport};
pub use udp::{UdpTransport, MAX_UDP_PAYLOAD};
