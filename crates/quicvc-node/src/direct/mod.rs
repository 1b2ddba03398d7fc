// ============================================
// File: crates/quicvc-node/src/direct/mod.rs
// ============================================
//! # Direct-Auth Sessions
//!
//! Credential exchange over service-byte framing, without packet headers
//! or connection IDs. See [`DirectSessionManager`].
//!
//! ## Last Modified
//! v0.1.0 - Initial direct-auth sessions

mod manager;
mod session;

pub use manager::DirectSessionManager;
pub use session::SessionState;
