// ============================================
// File: crates/quicvc-node/src/connection/mod.rs
// ============================================
//! # QUICVC Connections
//!
//! ## Main Functionality
//! - [`ConnectionManager`]: dial out, one ephemeral socket per connection
//! - [`QuicVcListener`]: accept on one shared socket
//! - [`ConnectionStream`]: per-connection events
//!
//! ## Module Structure
//! - `state`: connection data, state machine, replay window
//! - `context`: table, send/close, liveness
//! - `handler`: datagram dispatch
//! - `manager`, `listener`: public entry points
//!
//! ## Last Modified
//! v0.1.0 - Initial connection layer

mod context;
mod handler;
mod listener;
mod manager;
mod state;

pub use context::ConnectionStream;
pub use listener::QuicVcListener;
pub use manager::ConnectionManager;
pub use state::{ConnectionRole, ConnectionState, ReplayCheckResult, ReplayWindow, DEFAULT_STREAM_ID};
