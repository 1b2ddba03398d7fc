// ============================================
// File: crates/quicvc-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations for QUICVC, using audited
//! RustCrypto and dalek implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Device key pairs (Ed25519 identity, X25519 encryption)
//! - [`kdf`]: Application key derivation (HKDF-SHA256)
//! - [`protection`]: `PROTECTED` payload sealing (ChaCha20-Poly1305)
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │  Client                                        Server       │
//! │    │  INITIAL  { VC_INIT: credential, challenge } ──────►   │
//! │    │  ◄────── HANDSHAKE { VC_RESPONSE: credential }         │
//! │    │                                              │         │
//! │    │  Ed25519 proof checked on both credentials   │         │
//! │    │  X25519(static, peer publicKeyHex)           │         │
//! │    │              │                               │         │
//! │    │              ▼                               │         │
//! │    │      HKDF-SHA256 ─────► CryptoKeys           │         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Protected Phase                          │
//! │   sendKey + (sendIV ^ packetNumber) ──► ChaCha20-Poly1305   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER roll your own crypto
//! - Keep salts stable; changing them breaks interop with deployed peers
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod kdf;
pub mod keys;
pub mod protection;

pub use kdf::{derive_crypto_keys, derive_key_material, CryptoKeys};
pub use keys::{EncryptionKeyPair, IdentityKeyPair, IdentityPublicKey};
pub use protection::{ChaChaPacketProtection, PacketProtection};

// ============================================
// Constants
// ============================================

/// Size of Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of X25519 public key in bytes.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 key in bytes.
pub const CHACHA20_KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 nonce in bytes.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of Poly1305 authentication tag in bytes.
pub const POLY1305_TAG_SIZE: usize = 16;

/// HKDF salt for application key derivation (26 ASCII bytes).
pub const APPLICATION_KEYS_SALT: &[u8] = b"quicvc-application-keys-v1";

/// Total bytes expanded for one connection's `CryptoKeys`.
pub const KEY_MATERIAL_SIZE: usize = 192;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_length() {
        assert_eq!(APPLICATION_KEYS_SALT.len(), 26);
    }
}
