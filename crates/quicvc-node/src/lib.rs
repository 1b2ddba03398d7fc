// ============================================
// File: crates/quicvc-node/src/lib.rs
// ============================================
//! # QUICVC Node Library
//!
//! ## Creation Reason
//! Runs the QUICVC protocol on a device: credential-authenticated,
//! connection-ID based UDP connections to peers on the local network,
//! with no relay server and no certificate authority.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML node configuration
//! - [`identity`]: persistent device keys
//! - [`connection`]: header-framed connections (dial + listen)
//! - [`direct`]: service-byte framed direct-auth sessions
//! - [`events`]: per-connection and node-wide events
//! - [`error`]: node error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          QUICVC Node                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌───────────────────┐  ┌───────────────┐  │
//! │  │   Config    │────►│ ConnectionManager │  │ DirectSession │  │
//! │  │  Identity   │     │  QuicVcListener   │  │    Manager    │  │
//! │  └─────────────┘     └─────────┬─────────┘  └───────┬───────┘  │
//! │                                │                    │          │
//! │                      ┌─────────┴────────────────────┴───┐      │
//! │                      │   CredentialEngine (shared)      │      │
//! │                      └─────────┬────────────────────────┘      │
//! ├────────────────────────────────┼────────────────────────────────┤
//! │                     Transport Layer (UDP)                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - One `CredentialEngine` should be shared by every manager in a process
//!   so verified peers and invitations are seen everywhere
//! - Configuration changes require restart (no hot-reload)
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod direct;
pub mod error;
pub mod events;
pub mod identity;

// Re-export primary types
pub use config::NodeConfig;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStream, QuicVcListener};
pub use direct::{DirectSessionManager, SessionState};
pub use error::{NodeError, Result};
pub use events::{ConnectionEvent, NodeEvent};
pub use identity::DeviceIdentity;
