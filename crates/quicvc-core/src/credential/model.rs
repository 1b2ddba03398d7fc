// ============================================
// File: crates/quicvc-core/src/credential/model.rs
// ============================================
//! # Credential Data Model
//!
//! ## Creation Reason
//! Defines the W3C-shaped credential documents peers exchange, the
//! out-of-band invitation that can anchor them, and the record kept for
//! every peer whose credential passed verification.
//!
//! ## Main Functionality
//! - `Credential`, `CredentialSubject`, `Proof`: signed identity assertion
//! - `Invitation`: `{token, publicKey, url}` supplied out of band
//! - `VerifiedPeer` / `TrustLevel`: outcome of a successful verification
//!
//! ## JSON Shape
//! ```text
//! {
//!   "@context": [...], "id": "urn:uuid:...", "type": ["VerifiableCredential", ...],
//!   "issuer": "did:quicvc:<ed25519 hex>",
//!   "issuanceDate": "RFC3339", "expirationDate": "RFC3339"?,
//!   "credentialSubject": { "id", "type", "deviceId", "publicKeyHex",
//!                          "invitationToken"?, "inviterPublicKey"? },
//!   "proof": { "type", "created", "proofPurpose", "verificationMethod",
//!              "proofValue", "invitationToken"?, "nonce"? }
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Required string fields default to empty on decode so structural
//!   checks can name the missing field instead of failing inside serde
//! - `signing_input` must stay byte-stable: canonical JSON, sorted keys
//!
//! ## Last Modified
//! v0.1.0 - Initial credential model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CredentialError, Result};

// ============================================
// Constants
// ============================================

/// W3C credentials JSON-LD context.
pub const W3C_CREDENTIALS_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";

/// Base credential type tag.
pub const VERIFIABLE_CREDENTIAL_TYPE: &str = "VerifiableCredential";

/// Type tag for device identity credentials.
pub const DEVICE_IDENTITY_TYPE: &str = "QuicVcDeviceIdentity";

/// Type tag for invitation-anchored credentials.
pub const INVITATION_CREDENTIAL_TYPE: &str = "QuicVcInvitationCredential";

/// Proof scheme tag.
pub const PROOF_TYPE: &str = "Ed25519Signature2020";

/// Proof purpose for credential proofs.
pub const PROOF_PURPOSE: &str = "assertionMethod";

// ============================================
// Credential
// ============================================

/// Signed assertion binding a device identifier to a public key.
///
/// Immutable once signed; any field change invalidates `proof.proofValue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// JSON-LD contexts.
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,
    /// `urn:uuid:` identifier.
    #[serde(default)]
    pub id: String,
    /// Type tags; always includes `VerifiableCredential`.
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    /// Issuer DID; its key verifies the proof.
    #[serde(default)]
    pub issuer: String,
    /// RFC3339 issuance time.
    #[serde(default)]
    pub issuance_date: String,
    /// Optional RFC3339 expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    /// The asserted device.
    #[serde(default)]
    pub credential_subject: CredentialSubject,
    /// Issuer signature.
    #[serde(default)]
    pub proof: Proof,
}

/// The device a credential speaks about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSubject {
    /// Subject DID.
    #[serde(default)]
    pub id: String,
    /// Subject type tag.
    #[serde(rename = "type", default)]
    pub subject_type: String,
    /// Device label.
    #[serde(default)]
    pub device_id: String,
    /// X25519 public key (hex) used for application key agreement.
    #[serde(default)]
    pub public_key_hex: String,
    /// Invitation this credential is anchored to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_token: Option<String>,
    /// Public key of the invitation issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter_public_key: Option<String>,
}

/// Signature block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// Signature scheme tag.
    #[serde(rename = "type", default)]
    pub proof_type: String,
    /// RFC3339 signing time.
    #[serde(default)]
    pub created: String,
    /// Always `assertionMethod`.
    #[serde(default)]
    pub proof_purpose: String,
    /// Issuer key reference.
    #[serde(default)]
    pub verification_method: String,
    /// Hex Ed25519 signature over [`Credential::signing_input`].
    #[serde(default)]
    pub proof_value: String,
    /// Invitation token, mirrored from the subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_token: Option<String>,
    /// Random nonce making repeated issuance distinguishable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// The fields covered by the proof, serialized in canonical form.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    credential_subject: &'a CredentialSubject,
    issuer: &'a str,
    issuance_date: &'a str,
    expiration_date: Option<&'a str>,
}

impl Credential {
    /// Returns the canonical bytes the proof signs.
    ///
    /// Covers `credentialSubject`, `issuer`, `issuanceDate` and
    /// `expirationDate`. Keys are emitted in sorted order at every level.
    ///
    /// # Errors
    /// Returns `Json` if serialization fails.
    pub fn signing_input(&self) -> Result<Vec<u8>> {
        let payload = SigningPayload {
            credential_subject: &self.credential_subject,
            issuer: &self.issuer,
            issuance_date: &self.issuance_date,
            expiration_date: self.expiration_date.as_deref(),
        };
        // Routing through `Value` sorts object keys.
        let canonical = serde_json::to_value(&payload)?;
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Checks that every required field is present and well-formed.
    ///
    /// # Errors
    /// The first missing or invalid field.
    pub fn check_structure(&self) -> std::result::Result<(), CredentialError> {
        let required = [
            ("id", self.id.as_str()),
            ("issuer", self.issuer.as_str()),
            ("issuanceDate", self.issuance_date.as_str()),
            ("credentialSubject.id", self.credential_subject.id.as_str()),
            ("credentialSubject.deviceId", self.credential_subject.device_id.as_str()),
            ("credentialSubject.publicKeyHex", self.credential_subject.public_key_hex.as_str()),
            ("proof.type", self.proof.proof_type.as_str()),
            ("proof.proofValue", self.proof.proof_value.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(CredentialError::MissingField(field));
        }

        if !self.types.iter().any(|t| t == VERIFIABLE_CREDENTIAL_TYPE) {
            return Err(CredentialError::InvalidField {
                field: "type",
                reason: format!("must include {VERIFIABLE_CREDENTIAL_TYPE}"),
            });
        }
        parse_date("issuanceDate", &self.issuance_date)?;
        if let Some(expiry) = &self.expiration_date {
            parse_date("expirationDate", expiry)?;
        }
        Ok(())
    }

    /// Returns `true` if `expirationDate` lies before `now`.
    ///
    /// Credentials without an expiry never expire. An unparseable expiry is
    /// treated as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date
            .as_deref()
            .is_some_and(|expiry| parse_date("expirationDate", expiry).map_or(true, |t| t < now))
    }

    /// Returns `true` if the issuer asserted its own identity.
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.issuer == self.credential_subject.id
    }

    /// Returns the subject's device label.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.credential_subject.device_id
    }

    /// Serializes to JSON bytes.
    ///
    /// # Errors
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CoreError::from)
    }
}

/// Parses an RFC3339 timestamp field.
pub(crate) fn parse_date(
    field: &'static str,
    value: &str,
) -> std::result::Result<DateTime<Utc>, CredentialError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CredentialError::InvalidField {
            field,
            reason: e.to_string(),
        })
}

// ============================================
// Invitation
// ============================================

/// Out-of-band invitation anchoring trust between two devices.
///
/// Consumed read-only by the credential engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Shared invitation token.
    pub token: String,
    /// Inviter public key (hex).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Broker URL the invitation was issued through.
    pub url: String,
}

impl Invitation {
    /// Creates an invitation.
    pub fn new(
        token: impl Into<String>,
        public_key: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            public_key: public_key.into(),
            url: url.into(),
        }
    }

    /// Parses an invitation from its JSON form.
    ///
    /// # Errors
    /// Returns `Json` on malformed input or `MalformedMessage` if it fails
    /// [`Invitation::validate`].
    pub fn from_json(s: &str) -> Result<Self> {
        let invitation: Self = serde_json::from_str(s)?;
        invitation.validate()?;
        Ok(invitation)
    }

    /// Checks that the token is present and the key is hex.
    ///
    /// # Errors
    /// Returns `MalformedMessage` describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(CoreError::malformed("invitation token is empty"));
        }
        if self.public_key.is_empty() || hex::decode(&self.public_key).is_err() {
            return Err(CoreError::malformed("invitation publicKey must be hex"));
        }
        Ok(())
    }
}

// ============================================
// Trust
// ============================================

/// Provenance of a verified credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Anchored to an out-of-band invitation.
    Invitation,
    /// Self-signed (`issuer == credentialSubject.id`).
    Direct,
    /// Signed by a third party.
    Chain,
}

impl TrustLevel {
    /// Classifies a credential that has already passed verification.
    #[must_use]
    pub fn of(credential: &Credential) -> Self {
        if credential.credential_subject.invitation_token.is_some() {
            Self::Invitation
        } else if credential.is_self_issued() {
            Self::Direct
        } else {
            Self::Chain
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invitation => "invitation",
            Self::Direct => "direct",
            Self::Chain => "chain",
        })
    }
}

/// Record that a remote credential passed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPeer {
    /// Remote device label.
    pub device_id: String,
    /// Remote X25519 key (hex).
    pub public_key_hex: String,
    /// The credential that was verified.
    pub credential: Credential,
    /// When verification succeeded.
    pub verified_at: DateTime<Utc>,
    /// Provenance classification.
    pub trust_level: TrustLevel,
    /// Invitation the credential is anchored to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_token: Option<String>,
}

impl VerifiedPeer {
    /// Builds the record for a credential verified at `verified_at`.
    #[must_use]
    pub fn from_credential(credential: Credential, verified_at: DateTime<Utc>) -> Self {
        Self {
            device_id: credential.credential_subject.device_id.clone(),
            public_key_hex: credential.credential_subject.public_key_hex.clone(),
            trust_level: TrustLevel::of(&credential),
            invitation_token: credential.credential_subject.invitation_token.clone(),
            credential,
            verified_at,
        }
    }
}

// ============================================
// Tests
// ============================================
