// ============================================
// File: crates/quicvc-core/src/protocol/version.rs
// ============================================
//! # Protocol Versioning
//!
//! ## Creation Reason
//! Every QUICVC packet header carries a 32-bit version so peers running
//! different releases can recognise each other's packets.
//!
//! ## Version History
//! | Version      | Description |
//! |--------------|-------------|
//! | 0x0000_0001  | Initial QUICVC (JSON frames, ChaCha20-Poly1305 protected packets) |
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALWAYS bump the version for header or frame encoding changes
//! - Packets with unsupported versions are dropped silently
//!
//! ## Last Modified
//! v0.1.0 - Initial version definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const CURRENT_PROTOCOL_VERSION: u32 = 0x0000_0001;

/// Minimum supported protocol version.
pub const MIN_SUPPORTED_VERSION: u32 = 0x0000_0001;

/// Maximum supported protocol version.
pub const MAX_SUPPORTED_VERSION: u32 = 0x0000_0001;

/// Protocol version identifier.
///
/// # Example
/// ```
/// use quicvc_core::protocol::ProtocolVersion;
///
/// assert!(ProtocolVersion::current().is_supported());
/// assert!(!ProtocolVersion::new(0).is_supported());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    /// Creates a new protocol version.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Returns the current protocol version.
    #[must_use]
    pub const fn current() -> Self {
        Self(CURRENT_PROTOCOL_VERSION)
    }

    /// Returns the raw version number.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Checks if this version is supported by the current implementation.
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        self.0 >= MIN_SUPPORTED_VERSION && self.0 <= MAX_SUPPORTED_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for ProtocolVersion {
    fn from(version: u32) -> Self {
        Self(version)
    }
}

impl From<ProtocolVersion> for u32 {
    fn from(version: ProtocolVersion) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_support_check() {
        assert!(ProtocolVersion::current().is_supported());
        assert!(!ProtocolVersion::new(0).is_supported());
        assert!(!ProtocolVersion::new(u32::MAX).is_supported());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::new(1).to_string(), "0x00000001");
    }
}
