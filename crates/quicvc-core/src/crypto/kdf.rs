// ============================================
// File: crates/quicvc-core/src/crypto/kdf.rs
// ============================================
//! # Application Key Derivation
//!
//! ## Creation Reason
//! Turns two devices' X25519 keys into the six symmetric values a
//! connection needs once its handshake completes.
//!
//! ## Main Functionality
//! - `derive_key_material`: HKDF-SHA256 expansion to 192 bytes
//! - `CryptoKeys`: the six split fields, oriented for one side
//! - `derive_crypto_keys`: DH + derivation + orientation in one call
//!
//! ## Derivation
//! ```text
//! ikm  = X25519(local_secret, remote_public)
//! info = min(localHex, remoteHex) || max(localHex, remoteHex)
//! okm  = HKDF-SHA256(salt = "quicvc-application-keys-v1", ikm, info, 192)
//!
//! okm: | enc 32 | dec 32 | sendIV 16 | recvIV 16 | sendMAC 32 | recvMAC 32 | rsvd 32 |
//!        └──────── "low" side view; the "high" side swaps each pair ──────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Info ordering is canonical (ascending hex), never "local first"
//! - Both ends compute identical `okm`; only `orient` differs per side
//! - Keys are never regenerated for the lifetime of a connection
//!
//! ## Last Modified
//! v0.1.0 - Initial key derivation

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{parse_x25519_public_hex, EncryptionKeyPair};
use super::{APPLICATION_KEYS_SALT, CHACHA20_KEY_SIZE, KEY_MATERIAL_SIZE};
use crate::error::{CoreError, Result};

/// Size of each derived IV in bytes.
pub const IV_SIZE: usize = 16;

/// Size of each derived HMAC key in bytes.
pub const HMAC_KEY_SIZE: usize = 32;

// ============================================
// CryptoKeys
// ============================================

/// Symmetric material for one side of an established connection.
///
/// `encryption_key`/`send_iv` protect outbound packets; the peer holds the
/// same bytes as its `decryption_key`/`receive_iv`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKeys {
    /// Key sealing outbound `PROTECTED` payloads.
    pub encryption_key: [u8; CHACHA20_KEY_SIZE],
    /// Key opening inbound `PROTECTED` payloads.
    pub decryption_key: [u8; CHACHA20_KEY_SIZE],
    /// IV mixed into outbound nonces.
    pub send_iv: [u8; IV_SIZE],
    /// IV mixed into inbound nonces.
    pub receive_iv: [u8; IV_SIZE],
    /// Outbound HMAC key.
    pub send_hmac: [u8; HMAC_KEY_SIZE],
    /// Inbound HMAC key.
    pub receive_hmac: [u8; HMAC_KEY_SIZE],
}

impl CryptoKeys {
    /// Splits key material in declaration order.
    ///
    /// The six fields use the first 160 bytes; the last 32 are reserved.
    #[must_use]
    pub fn from_material(okm: &[u8; KEY_MATERIAL_SIZE]) -> Self {
        let mut keys = Self {
            encryption_key: [0; CHACHA20_KEY_SIZE],
            decryption_key: [0; CHACHA20_KEY_SIZE],
            send_iv: [0; IV_SIZE],
            receive_iv: [0; IV_SIZE],
            send_hmac: [0; HMAC_KEY_SIZE],
            receive_hmac: [0; HMAC_KEY_SIZE],
        };
        keys.encryption_key.copy_from_slice(&okm[0..32]);
        keys.decryption_key.copy_from_slice(&okm[32..64]);
        keys.send_iv.copy_from_slice(&okm[64..80]);
        keys.receive_iv.copy_from_slice(&okm[80..96]);
        keys.send_hmac.copy_from_slice(&okm[96..128]);
        keys.receive_hmac.copy_from_slice(&okm[128..160]);
        keys
    }

    /// Orients the keys for the local side.
    ///
    /// The side whose public key sorts higher swaps every send/receive
    /// pair, so each side's send half is the other's receive half.
    #[must_use]
    pub fn orient(mut self, local_public_hex: &str, remote_public_hex: &str) -> Self {
        if local_public_hex > remote_public_hex {
            std::mem::swap(&mut self.encryption_key, &mut self.decryption_key);
            std::mem::swap(&mut self.send_iv, &mut self.receive_iv);
            std::mem::swap(&mut self.send_hmac, &mut self.receive_hmac);
        }
        self
    }
}

impl fmt::Debug for CryptoKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CryptoKeys([REDACTED])")
    }
}

// ============================================
// Key Derivation
// ============================================

/// Expands 192 bytes of key material from a shared secret.
///
/// The two public-key strings are ordered ascending before being used as
/// HKDF info, so the result does not depend on which side calls it.
///
/// # Errors
/// Returns `KeyDerivation` if HKDF rejects the output length.
pub fn derive_key_material(
    shared_secret: &[u8; 32],
    local_public_hex: &str,
    remote_public_hex: &str,
) -> Result<[u8; KEY_MATERIAL_SIZE]> {
    let (first, second) = if local_public_hex <= remote_public_hex {
        (local_public_hex, remote_public_hex)
    } else {
        (remote_public_hex, local_public_hex)
    };

    let mut info = Vec::with_capacity(first.len() + second.len());
    info.extend_from_slice(first.as_bytes());
    info.extend_from_slice(second.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(APPLICATION_KEYS_SALT), shared_secret);
    let mut okm = [0u8; KEY_MATERIAL_SIZE];
    hk.expand(&info, &mut okm).map_err(|_| {
        CoreError::key_derivation(format!("HKDF expansion failed for {KEY_MATERIAL_SIZE} bytes"))
    })?;

    info.zeroize();
    Ok(okm)
}

/// Derives oriented application keys for a connection.
///
/// # Arguments
/// * `local` - This device's X25519 key pair
/// * `remote_public_hex` - Peer's `credentialSubject.publicKeyHex`
///
/// # Errors
/// Returns `InvalidKey` if the peer key is malformed.
pub fn derive_crypto_keys(local: &EncryptionKeyPair, remote_public_hex: &str) -> Result<CryptoKeys> {
    let remote = parse_x25519_public_hex(remote_public_hex)?;
    let local_hex = local.public_key_hex();

    let mut shared = local.exchange(&remote);
    let okm = derive_key_material(&shared, &local_hex, remote_public_hex);
    shared.zeroize();

    let mut okm = okm?;
    let keys = CryptoKeys::from_material(&okm).orient(&local_hex, remote_public_hex);
    okm.zeroize();
    Ok(keys)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_is_deterministic() {
        let secret = [0x42u8; 32];
        let a = derive_key_material(&secret, "aa", "bb").unwrap();
        let b = derive_key_material(&secret, "aa", "bb").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, [0u8; KEY_MATERIAL_SIZE]);
    }

    #[test]
    fn test_material_ignores_call_order() {
        let secret = [0x42u8; 32];
        let a = derive_key_material(&secret, "aa", "bb").unwrap();
        let b = derive_key_material(&secret, "bb", "aa").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_material_depends_on_keys() {
        let secret = [0x42u8; 32];
        let a = derive_key_material(&secret, "aa", "bb").unwrap();
        let b = derive_key_material(&secret, "aa", "cc").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_split_layout() {
        let mut okm = [0u8; KEY_MATERIAL_SIZE];
        for (i, b) in okm.iter_mut().enumerate() {
            *b = u8::try_from(i).unwrap();
        }
        let keys = CryptoKeys::from_material(&okm);
        assert_eq!(keys.encryption_key[0], 0);
        assert_eq!(keys.decryption_key[0], 32);
        assert_eq!(keys.send_iv[0], 64);
        assert_eq!(keys.receive_iv[0], 80);
        assert_eq!(keys.send_hmac[0], 96);
        assert_eq!(keys.receive_hmac[0], 128);
        assert_eq!(keys.receive_hmac[31], 159);
    }

    #[test]
    fn test_both_sides_agree() {
        let alice = EncryptionKeyPair::generate();
        let bob = EncryptionKeyPair::generate();

        let a1 = derive_crypto_keys(&alice, &bob.public_key_hex()).unwrap();
        let a2 = derive_crypto_keys(&alice, &bob.public_key_hex()).unwrap();
        let b = derive_crypto_keys(&bob, &alice.public_key_hex()).unwrap();

        assert_eq!(a1, a2);
        assert_eq!(a1.encryption_key, b.decryption_key);
        assert_eq!(a1.decryption_key, b.encryption_key);
        assert_eq!(a1.send_iv, b.receive_iv);
        assert_eq!(a1.receive_iv, b.send_iv);
        assert_eq!(a1.send_hmac, b.receive_hmac);
        assert_eq!(a1.receive_hmac, b.send_hmac);
    }

    #[test]
    fn test_rejects_bad_remote_key() {
        let alice = EncryptionKeyPair::generate();
        assert!(derive_crypto_keys(&alice, "not-hex").is_err());
        assert!(derive_crypto_keys(&alice, "abcd").is_err());
    }
}
