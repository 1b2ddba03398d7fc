// ============================================
// File: crates/quicvc-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines the two long-term key pairs every QUICVC device holds, with
//! proper security properties (zeroize on drop, redacted Debug output).
//!
//! ## Main Functionality
//! - `IdentityKeyPair`: Ed25519 signing keys, issuer of credentials
//! - `IdentityPublicKey`: Ed25519 verifying key, encoded in the issuer DID
//! - `EncryptionKeyPair`: X25519 static keys, published as `publicKeyHex`
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  IdentityKeyPair (Long-term, Ed25519)                      │
//! │  ├─ Generated once per device, persisted by the node       │
//! │  ├─ Signs credential proofs                                │
//! │  └─ Public half becomes did:quicvc:<hex>                   │
//! │                                                            │
//! │  EncryptionKeyPair (Long-term, X25519)                     │
//! │  ├─ Generated alongside the identity                       │
//! │  ├─ Public half travels in credentialSubject.publicKeyHex  │
//! │  └─ Static-static DH feeds application key derivation      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Private keys should NEVER be logged or serialized carelessly
//! - `publicKeyHex` is the X25519 key, NOT the signing key
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::{ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};

/// DID method prefix for QUICVC device identities.
pub const DID_PREFIX: &str = "did:quicvc:";

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair for signing credentials.
///
/// # Example
/// ```
/// use quicvc_core::crypto::IdentityKeyPair;
///
/// let identity = IdentityKeyPair::generate();
/// let signature = identity.sign(b"hello world");
/// assert!(identity.public_key().verify(b"hello world", &signature).is_ok());
/// ```
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new random identity key pair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates an identity key pair from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut seed: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "Ed25519 seed must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the public key component.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Returns the DID naming this identity.
    #[must_use]
    pub fn did(&self) -> String {
        self.public_key().to_did()
    }

    /// Signs a message with this identity.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Exports the seed for persistence.
    ///
    /// # Security Warning
    /// Zero the returned bytes once they have been written out.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Public component of an Ed25519 identity key.
///
/// Serialized as lowercase hex. Its DID form `did:quicvc:<hex>` is the
/// credential `issuer`, and is the only place verifiers take a signing
/// key from.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CoreError::invalid_key("Invalid Ed25519 public key"))
    }

    /// Parses a 64-character hex string.
    ///
    /// # Errors
    /// Returns `InvalidKey` on bad hex, wrong length or invalid point.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CoreError::invalid_key("Ed25519 key is not hex"))?;
        let arr: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::invalid_key("Ed25519 key must be 32 bytes"))?;
        Self::from_bytes(&arr)
    }

    /// Extracts the key from a `did:quicvc:<hex>` identifier.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the DID uses another method or a bad key.
    pub fn from_did(did: &str) -> Result<Self> {
        let hex_part = did
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| CoreError::invalid_key("issuer is not a did:quicvc identifier"))?;
        Self::from_hex(hex_part)
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Returns the lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Returns the `did:quicvc:` identifier for this key.
    #[must_use]
    pub fn to_did(&self) -> String {
        format!("{DID_PREFIX}{}", self.to_hex())
    }

    /// Verifies a signature against this public key.
    ///
    /// # Errors
    /// Returns `SignatureVerification` if the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify(message, &sig)
            .map_err(|_| CoreError::SignatureVerification)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.as_bytes();
        write!(
            f,
            "IdentityPublicKey({:02x}{:02x}{:02x}{:02x}...)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================
// EncryptionKeyPair (X25519)
// ============================================

/// Long-term X25519 key pair used for application key agreement.
///
/// Unlike an ephemeral secret, the static secret can perform any number
/// of exchanges, one per connection.
///
/// # Example
/// ```
/// use quicvc_core::crypto::EncryptionKeyPair;
///
/// let alice = EncryptionKeyPair::generate();
/// let bob = EncryptionKeyPair::generate();
/// assert_eq!(
///     alice.exchange(&bob.public_key_bytes()),
///     bob.exchange(&alice.public_key_bytes()),
/// );
/// ```
pub struct EncryptionKeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl EncryptionKeyPair {
    /// Generates a new random key pair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restores a key pair from its 32-byte secret.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut raw: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::invalid_key(format!(
                "X25519 secret must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let secret = StaticSecret::from(raw);
        raw.zeroize();
        let public = X25519PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// Returns the public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Returns the public key as lowercase hex (`publicKeyHex`).
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Computes the X25519 shared secret with a peer's public key.
    #[must_use]
    pub fn exchange(&self, peer_public: &[u8; X25519_PUBLIC_KEY_SIZE]) -> [u8; 32] {
        let peer = X25519PublicKey::from(*peer_public);
        *self.secret.diffie_hellman(&peer).as_bytes()
    }

    /// Exports the secret for persistence.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

impl fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.public.as_bytes();
        f.debug_struct("EncryptionKeyPair")
            .field(
                "public",
                &format_args!(
                    "{:02x}{:02x}{:02x}{:02x}...",
                    bytes[0], bytes[1], bytes[2], bytes[3]
                ),
            )
            .finish_non_exhaustive()
    }
}

/// Parses a hex X25519 public key as carried in `publicKeyHex`.
///
/// # Errors
/// Returns `InvalidKey` on bad hex or wrong length.
pub fn parse_x25519_public_hex(s: &str) -> Result<[u8; X25519_PUBLIC_KEY_SIZE]> {
    let bytes = hex::decode(s).map_err(|_| CoreError::invalid_key("publicKeyHex is not hex"))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::invalid_key("publicKeyHex must be 32 bytes"))
}

// ============================================
// Tests
// ============================================
