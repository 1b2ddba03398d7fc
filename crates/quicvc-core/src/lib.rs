// ============================================
// File: crates/quicvc-core/src/lib.rs
// ============================================
//! # QUICVC Core - Protocol, Cryptography & Credentials
//!
//! ## Creation Reason
//! Holds every piece of QUICVC that needs no sockets: the wire format,
//! key derivation, packet protection and the credential trust model.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Packet header codec (INITIAL / HANDSHAKE / PROTECTED / RETRY)
//! - Frame definitions with JSON payload encoding
//! - Service-byte framing for direct-auth sessions
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`IdentityKeyPair`, `EncryptionKeyPair`)
//! - Application key derivation (HKDF-SHA256 over X25519)
//! - Packet protection (ChaCha20-Poly1305)
//!
//! ### Credential Module ([`credential`])
//! - Credential issuance and verification (`CredentialEngine`)
//! - Invitation-anchored issuer
//! - VC exchange message flow
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 quicvc-node                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   quicvc-core           quicvc-transport            │
//! │   You are here                │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │              quicvc-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses RustCrypto / dalek implementations
//! - Secret key material implements Zeroize
//! - No I/O in this crate; keep it that way
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod credential;
pub mod crypto;
pub mod error;
pub mod protocol;

pub use credential::{
    Credential, CredentialEngine, Invitation, InvitationIssuer, TrustLevel, VcMessage,
    VerifiedPeer,
};
pub use crypto::{CryptoKeys, EncryptionKeyPair, IdentityKeyPair};
pub use error::{CoreError, CredentialError, Result};
pub use protocol::{Frame, PacketHeader, PacketType, ProtocolVersion, ServiceType};
