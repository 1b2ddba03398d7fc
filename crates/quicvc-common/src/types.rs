// ============================================
// File: crates/quicvc-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers exchanged during a QUICVC handshake so that
//! every crate agrees on their size and textual form.
//!
//! ## Main Functionality
//! - `ConnectionId`: 16-byte destination/source connection identifier
//! - `Challenge`: 32-byte random value correlating a handshake
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both types are generated from the OS-seeded RNG; never derive them
//! - Connection IDs travel in cleartext headers and are not secrets
//! - Hex is the canonical textual form (logs, JSON, table keys)
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of a connection identifier in bytes.
pub const CONNECTION_ID_SIZE: usize = 16;

/// Size of a handshake challenge in bytes.
pub const CHALLENGE_SIZE: usize = 32;

// ============================================
// ConnectionId
// ============================================

/// Connection identifier used to demultiplex packets.
///
/// # Wire Format
/// ```text
/// ┌────────────────────────────────────┐
/// │     Connection ID (16 bytes)       │
/// │  dcid / scid in every packet header│
/// └────────────────────────────────────┘
/// ```
///
/// # Example
/// ```
/// use quicvc_common::types::ConnectionId;
///
/// let id = ConnectionId::generate();
/// let restored = ConnectionId::from_bytes(id.as_bytes()).unwrap();
/// assert_eq!(id, restored);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; CONNECTION_ID_SIZE]);

impl ConnectionId {
    /// Creates a `ConnectionId` from raw bytes.
    ///
    /// # Returns
    /// `None` if `bytes` is not exactly 16 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; CONNECTION_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Generates a new random `ConnectionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; CONNECTION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CONNECTION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionId({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ConnectionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| CommonError::invalid_length(CONNECTION_ID_SIZE, bytes.len()))
    }
}

impl Serialize for ConnectionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for ConnectionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// Challenge
// ============================================

/// Random 32-byte handshake challenge.
///
/// Generated once per connection; the responder echoes it in
/// `VC_RESPONSE` so the initiator can match the reply to its `VC_INIT`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Challenge([u8; CHALLENGE_SIZE]);

impl Challenge {
    /// Generates a fresh random challenge.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a challenge from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHALLENGE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.0
    }

    /// Returns the lowercase hex form used on the wire.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({:02x}{:02x}...)", self.0[0], self.0[1])
    }
}

impl FromStr for Challenge {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; CHALLENGE_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CommonError::invalid_length(CHALLENGE_SIZE, bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Challenge {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Challenge {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generate_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_wrong_length() {
        assert!(ConnectionId::from_bytes(&[0u8; 15]).is_none());
        assert!(ConnectionId::from_bytes(&[0u8; 17]).is_none());
    }

    #[test]
    fn test_connection_id_hex_display_parse() {
        let id = ConnectionId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<ConnectionId>().unwrap(), id);
        assert!("abcd".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_connection_id_debug_truncated() {
        let id = ConnectionId::from_bytes(&[0xAB; 16]).unwrap();
        assert_eq!(format!("{id:?}"), "ConnectionId(abababab...)");
    }

    #[test]
    fn test_challenge_json() {
        let challenge = Challenge::generate();
        let json = serde_json::to_string(&challenge).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let restored: Challenge = serde_json::from_str(&json).unwrap();
        assert_eq!(challenge, restored);
    }
}
