// ============================================
// File: crates/quicvc-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to packet codec, key derivation, packet
//! protection and credential operations in the QUICVC core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - `CredentialError`: Why a presented credential was rejected
//!
//! ## Error Categories
//! 1. **Crypto Errors**: Key parsing, signing, sealing/opening failures
//! 2. **Protocol Errors**: Header parsing, unknown frame/service types
//! 3. **Credential Errors**: Structural, expiry, signature, invitation mismatch
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Malformed packets are dropped by callers; keep messages short
//! - `CredentialError` display strings are sent to peers inside `vc_error`
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use quicvc_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CredentialError
// ============================================

/// Reason a credential failed verification.
///
/// Checks run in a fixed order and stop at the first failure, so exactly
/// one reason is reported per rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// A required field is missing or empty.
    #[error("credential is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but cannot be interpreted.
    #[error("credential field '{field}' is invalid: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// `expirationDate` lies in the past.
    #[error("credential expired at {0}")]
    Expired(String),

    /// `proof.proofValue` does not verify against the issuer key.
    #[error("credential signature is invalid")]
    InvalidSignature,

    /// The embedded inviter key disagrees with the locally known invitation.
    #[error("inviter public key does not match invitation '{token}'")]
    InvitationMismatch {
        /// Invitation token named by the credential
        token: String,
    },
}

// ============================================
// CoreError
// ============================================

/// Core error types for protocol, crypto and credential operations.
///
/// # Security Note
/// Error messages are designed to be informative for debugging
/// without revealing sensitive information like key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Key bytes could not be parsed.
    #[error("Invalid key: {context}")]
    InvalidKey {
        /// What key was being parsed
        context: String,
    },

    /// Signature verification failed.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Decryption operation failed (authentication failure).
    #[error("Decryption failed: authentication error")]
    Decryption,

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    // ========================================
    // Protocol Errors
    // ========================================

    /// Unknown packet type tag.
    #[error("Unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    /// Unknown frame type tag.
    #[error("Unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    /// Unknown direct-auth service byte.
    #[error("Unknown service type: {0}")]
    UnknownServiceType(u8),

    /// Message is malformed or truncated.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// What's wrong with the message
        reason: String,
    },

    /// Message is too short to be valid.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Message exceeds maximum allowed size.
    #[error("Message too large: max {max} bytes, got {actual}")]
    MessageTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size received
        actual: usize,
    },

    // ========================================
    // Credential Errors
    // ========================================

    /// Credential failed verification.
    #[error("Credential verification failed: {0}")]
    Credential(#[from] CredentialError),

    // ========================================
    // Wrapped Errors
    // ========================================

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(context: impl Into<String>) -> Self {
        Self::InvalidKey {
            context: context.into(),
        }
    }

    /// Creates a `MalformedMessage` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a `MessageTooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Creates a `KeyDerivation` error.
    pub fn key_derivation(reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a protocol error.
    ///
    /// Protocol errors are never answered on the wire; the datagram is dropped.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPacketType(_)
                | Self::UnknownFrameType(_)
                | Self::UnknownServiceType(_)
                | Self::MalformedMessage { .. }
                | Self::MessageTooShort { .. }
                | Self::MessageTooLarge { .. }
                | Self::Json(_)
        )
    }

    /// Returns `true` if this is a forward-compatible unknown tag.
    #[must_use]
    pub const fn is_unknown_type(&self) -> bool {
        matches!(
            self,
            Self::UnknownPacketType(_) | Self::UnknownFrameType(_) | Self::UnknownServiceType(_)
        )
    }

    /// Returns `true` if this error might indicate an attack.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerification
                | Self::Decryption
                | Self::Credential(
                    CredentialError::InvalidSignature | CredentialError::InvitationMismatch { .. }
                )
        )
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::SignatureVerification;
        assert!(err.to_string().contains("Signature"));

        let err = CoreError::too_short(100, 50);
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));

        let err = CoreError::UnknownFrameType(0x7f);
        assert_eq!(err.to_string(), "Unknown frame type: 0x7f");
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::SignatureVerification.is_suspicious());
        assert!(!CoreError::Decryption.is_protocol_error());
        assert!(CoreError::Decryption.is_suspicious());

        assert!(CoreError::UnknownServiceType(9).is_protocol_error());
        assert!(CoreError::UnknownServiceType(9).is_unknown_type());
        assert!(!CoreError::too_short(15, 3).is_unknown_type());

        let forged: CoreError = CredentialError::InvalidSignature.into();
        assert!(forged.is_suspicious());
        let expired: CoreError = CredentialError::Expired("2020-01-01T00:00:00Z".into()).into();
        assert!(!expired.is_suspicious());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
