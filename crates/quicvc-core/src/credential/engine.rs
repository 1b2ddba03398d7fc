// ============================================
// File: crates/quicvc-core/src/credential/engine.rs
// ============================================
//! # Credential Engine
//!
//! ## Creation Reason
//! Issues, signs and verifies device credentials, and keeps the process-wide
//! record of which peers have been verified and at what trust level.
//!
//! ## Main Functionality
//! - `CredentialEngine`: issuance, verification, verified-peer table
//! - Invitation table for cross-checking invitation-anchored credentials
//!
//! ## Verification Order
//! ```text
//! structure ──► expiry ──► signature ──► invitation cross-check
//!     │            │           │                  │
//!     ▼            ▼           ▼                  ▼
//! MissingField  Expired  InvalidSignature  InvitationMismatch
//! InvalidField                             (unknown token: logged only)
//! ```
//! The first failing stage wins; later stages are not evaluated.
//!
//! ## ⚠️ Important Note for Next Developer
//! - One engine instance is shared by every connection (wrap in `Arc`)
//! - The verifying key comes from the issuer DID, never from `publicKeyHex`
//! - No network I/O happens here
//!
//! ## Last Modified
//! v0.1.0 - Initial credential engine

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::RngCore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{
    Credential, CredentialSubject, Invitation, Proof, TrustLevel, VerifiedPeer,
    DEVICE_IDENTITY_TYPE, INVITATION_CREDENTIAL_TYPE, PROOF_PURPOSE, PROOF_TYPE,
    VERIFIABLE_CREDENTIAL_TYPE, W3C_CREDENTIALS_CONTEXT,
};
use crate::crypto::keys::{EncryptionKeyPair, IdentityKeyPair, IdentityPublicKey};
use crate::crypto::ED25519_SIGNATURE_SIZE;
use crate::error::{CredentialError, Result};

/// Default validity period for issued credentials.
pub const DEFAULT_CREDENTIAL_TTL_DAYS: i64 = 365;

/// Subject type tag for device credentials.
const DEVICE_SUBJECT_TYPE: &str = "Device";

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================
// CredentialEngine
// ============================================

/// Issues and verifies credentials for one local device.
///
/// # Thread Safety
/// All state is behind `DashMap`/`RwLock`; share via `Arc<CredentialEngine>`.
///
/// # Example
/// ```
/// use quicvc_core::credential::{CredentialEngine, TrustLevel};
///
/// let alice = CredentialEngine::new("alice");
/// let bob = CredentialEngine::new("bob");
///
/// let credential = alice.create_self_signed_credential().unwrap();
/// let peer = bob.accept_credential(&credential).unwrap();
/// assert_eq!(peer.trust_level, TrustLevel::Direct);
/// assert!(bob.is_peer_verified("alice"));
/// ```
pub struct CredentialEngine {
    device_id: String,
    identity: IdentityKeyPair,
    encryption: EncryptionKeyPair,
    credential_ttl: Option<Duration>,
    local_credential: RwLock<Option<Credential>>,
    verified_peers: DashMap<String, VerifiedPeer>,
    invitations: DashMap<String, Invitation>,
}

impl CredentialEngine {
    /// Creates an engine with freshly generated device keys.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::with_keys(
            device_id,
            IdentityKeyPair::generate(),
            EncryptionKeyPair::generate(),
        )
    }

    /// Creates an engine around existing device keys.
    pub fn with_keys(
        device_id: impl Into<String>,
        identity: IdentityKeyPair,
        encryption: EncryptionKeyPair,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            identity,
            encryption,
            credential_ttl: Some(Duration::days(DEFAULT_CREDENTIAL_TTL_DAYS)),
            local_credential: RwLock::new(None),
            verified_peers: DashMap::new(),
            invitations: DashMap::new(),
        }
    }

    /// Sets the validity period of issued credentials (`None` = no expiry).
    #[must_use]
    pub fn with_credential_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.credential_ttl = ttl;
        self
    }

    // ========================================
    // Identity Accessors
    // ========================================

    /// Returns the local device label.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the local DID.
    #[must_use]
    pub fn did(&self) -> String {
        self.identity.did()
    }

    /// Returns the local X25519 public key (hex).
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        self.encryption.public_key_hex()
    }

    /// Returns the local X25519 key pair for key agreement.
    #[must_use]
    pub fn encryption_keys(&self) -> &EncryptionKeyPair {
        &self.encryption
    }

    /// Returns the local signing identity.
    #[must_use]
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    // ========================================
    // Issuance
    // ========================================

    /// Creates and stores a credential anchored to `invitation`.
    ///
    /// The invitation is remembered so later credentials naming the same
    /// token can be cross-checked.
    ///
    /// # Errors
    /// Returns `MalformedMessage` for an invalid invitation, or `Json` if
    /// the credential cannot be serialized for signing.
    pub fn create_credential_from_invitation(&self, invitation: &Invitation) -> Result<Credential> {
        invitation.validate()?;
        self.add_invitation(invitation.clone());

        let did = self.did();
        let subject = CredentialSubject {
            id: did,
            subject_type: DEVICE_SUBJECT_TYPE.into(),
            device_id: self.device_id.clone(),
            public_key_hex: self.public_key_hex(),
            invitation_token: Some(invitation.token.clone()),
            inviter_public_key: Some(invitation.public_key.clone()),
        };
        let credential = self.sign(subject, INVITATION_CREDENTIAL_TYPE)?;

        info!(
            device_id = %self.device_id,
            token = %invitation.token,
            "Created invitation-anchored credential"
        );
        *self.local_credential.write() = Some(credential.clone());
        Ok(credential)
    }

    /// Creates and stores a self-signed device credential.
    ///
    /// # Errors
    /// Returns `Json` if the credential cannot be serialized for signing.
    pub fn create_self_signed_credential(&self) -> Result<Credential> {
        let subject = CredentialSubject {
            id: self.did(),
            subject_type: DEVICE_SUBJECT_TYPE.into(),
            device_id: self.device_id.clone(),
            public_key_hex: self.public_key_hex(),
            invitation_token: None,
            inviter_public_key: None,
        };
        let credential = self.sign(subject, DEVICE_IDENTITY_TYPE)?;

        info!(device_id = %self.device_id, "Created self-signed credential");
        *self.local_credential.write() = Some(credential.clone());
        Ok(credential)
    }

    /// Signs a credential for another device.
    ///
    /// The result verifies at `chain` trust: the issuer is this device, the
    /// subject is the other one. It is not stored as the local credential.
    ///
    /// # Errors
    /// Returns `Json` if the credential cannot be serialized for signing.
    pub fn issue_for_subject(
        &self,
        subject_did: impl Into<String>,
        subject_device_id: impl Into<String>,
        subject_public_key_hex: impl Into<String>,
    ) -> Result<Credential> {
        let subject = CredentialSubject {
            id: subject_did.into(),
            subject_type: DEVICE_SUBJECT_TYPE.into(),
            device_id: subject_device_id.into(),
            public_key_hex: subject_public_key_hex.into(),
            invitation_token: None,
            inviter_public_key: None,
        };
        debug!(
            issuer = %self.device_id,
            subject = %subject.device_id,
            "Issuing credential for subject"
        );
        self.sign(subject, DEVICE_IDENTITY_TYPE)
    }

    /// Returns the current local credential, if one was created.
    #[must_use]
    pub fn local_credential(&self) -> Option<Credential> {
        self.local_credential.read().clone()
    }

    /// Installs an externally issued credential as the local one.
    pub fn set_local_credential(&self, credential: Credential) {
        *self.local_credential.write() = Some(credential);
    }

    /// Returns the local credential, creating a self-signed one if none
    /// exists or the stored one has expired.
    ///
    /// # Errors
    /// See [`CredentialEngine::create_self_signed_credential`].
    pub fn ensure_local_credential(&self) -> Result<Credential> {
        if let Some(existing) = self.local_credential() {
            if !existing.is_expired_at(Utc::now()) {
                return Ok(existing);
            }
            debug!(device_id = %self.device_id, "Local credential expired, reissuing");
        }
        self.create_self_signed_credential()
    }

    fn sign(&self, subject: CredentialSubject, type_tag: &str) -> Result<Credential> {
        let now = Utc::now();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let issuer = self.did();
        let mut credential = Credential {
            context: vec![W3C_CREDENTIALS_CONTEXT.into()],
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            types: vec![VERIFIABLE_CREDENTIAL_TYPE.into(), type_tag.into()],
            issuance_date: rfc3339(now),
            expiration_date: self.credential_ttl.map(|ttl| rfc3339(now + ttl)),
            proof: Proof {
                proof_type: PROOF_TYPE.into(),
                created: rfc3339(now),
                proof_purpose: PROOF_PURPOSE.into(),
                verification_method: format!("{issuer}#key-1"),
                proof_value: String::new(),
                invitation_token: subject.invitation_token.clone(),
                nonce: Some(hex::encode(nonce)),
            },
            issuer,
            credential_subject: subject,
        };

        let signature = self.identity.sign(&credential.signing_input()?);
        credential.proof.proof_value = hex::encode(signature);
        Ok(credential)
    }

    // ========================================
    // Verification
    // ========================================

    /// Verifies a credential without recording anything.
    ///
    /// # Returns
    /// The trust level the credential earns.
    ///
    /// # Errors
    /// The first failed check, in the order documented on this module.
    pub fn verify_credential(
        &self,
        credential: &Credential,
    ) -> std::result::Result<TrustLevel, CredentialError> {
        credential.check_structure()?;

        if credential.is_expired_at(Utc::now()) {
            return Err(CredentialError::Expired(
                credential.expiration_date.clone().unwrap_or_default(),
            ));
        }

        Self::verify_signature(credential)?;
        self.check_invitation(credential)?;

        Ok(TrustLevel::of(credential))
    }

    /// Verifies a credential and records the peer on success.
    ///
    /// A later verification for the same `deviceId` supersedes the earlier
    /// record.
    ///
    /// # Errors
    /// See [`CredentialEngine::verify_credential`].
    pub fn accept_credential(
        &self,
        credential: &Credential,
    ) -> std::result::Result<VerifiedPeer, CredentialError> {
        if let Err(e) = self.verify_credential(credential) {
            warn!(
                device_id = %credential.credential_subject.device_id,
                error = %e,
                "Credential rejected"
            );
            return Err(e);
        }

        let peer = VerifiedPeer::from_credential(credential.clone(), Utc::now());
        info!(
            device_id = %peer.device_id,
            trust_level = %peer.trust_level,
            "Peer verified"
        );
        self.verified_peers.insert(peer.device_id.clone(), peer.clone());
        Ok(peer)
    }

    fn verify_signature(credential: &Credential) -> std::result::Result<(), CredentialError> {
        let issuer_key = IdentityPublicKey::from_did(&credential.issuer).map_err(|e| {
            CredentialError::InvalidField {
                field: "issuer",
                reason: e.to_string(),
            }
        })?;

        let signature: [u8; ED25519_SIGNATURE_SIZE] = hex::decode(&credential.proof.proof_value)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(CredentialError::InvalidSignature)?;

        let message = credential
            .signing_input()
            .map_err(|_| CredentialError::InvalidSignature)?;

        issuer_key
            .verify(&message, &signature)
            .map_err(|_| CredentialError::InvalidSignature)
    }

    fn check_invitation(&self, credential: &Credential) -> std::result::Result<(), CredentialError> {
        let Some(token) = credential.credential_subject.invitation_token.as_deref() else {
            return Ok(());
        };

        match self.invitations.get(token) {
            Some(known) => {
                let claimed = credential.credential_subject.inviter_public_key.as_deref();
                if claimed == Some(known.public_key.as_str()) {
                    Ok(())
                } else {
                    Err(CredentialError::InvitationMismatch {
                        token: token.to_string(),
                    })
                }
            }
            None => {
                debug!(token = %token, "Credential names an invitation unknown locally");
                Ok(())
            }
        }
    }

    // ========================================
    // Verified Peers
    // ========================================

    /// Returns the record for a verified device.
    #[must_use]
    pub fn get_verified_peer(&self, device_id: &str) -> Option<VerifiedPeer> {
        self.verified_peers.get(device_id).map(|p| p.clone())
    }

    /// Returns every verified peer.
    #[must_use]
    pub fn verified_peers(&self) -> Vec<VerifiedPeer> {
        self.verified_peers.iter().map(|p| p.value().clone()).collect()
    }

    /// Checks whether a device has been verified.
    #[must_use]
    pub fn is_peer_verified(&self, device_id: &str) -> bool {
        self.verified_peers.contains_key(device_id)
    }

    /// Forgets one verified device.
    pub fn remove_verified_peer(&self, device_id: &str) -> Option<VerifiedPeer> {
        self.verified_peers.remove(device_id).map(|(_, p)| p)
    }

    /// Forgets every verified device.
    pub fn clear_verified_peers(&self) {
        self.verified_peers.clear();
    }

    // ========================================
    // Invitations
    // ========================================

    /// Remembers an invitation for cross-checking.
    pub fn add_invitation(&self, invitation: Invitation) {
        self.invitations.insert(invitation.token.clone(), invitation);
    }

    /// Returns a known invitation by token.
    #[must_use]
    pub fn get_invitation(&self, token: &str) -> Option<Invitation> {
        self.invitations.get(token).map(|i| i.clone())
    }

    /// Forgets every invitation.
    pub fn clear_invitations(&self) {
        self.invitations.clear();
    }
}

impl std::fmt::Debug for CredentialEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEngine")
            .field("device_id", &self.device_id)
            .field("identity", &self.identity)
            .field("verified_peers", &self.verified_peers.len())
            .field("invitations", &self.invitations.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
