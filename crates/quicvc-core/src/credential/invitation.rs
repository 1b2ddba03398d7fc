// ============================================
// File: crates/quicvc-core/src/credential/invitation.rs
// ============================================
//! # Invitation-Anchored Issuer
//!
//! ## Creation Reason
//! Wraps a shared [`CredentialEngine`] with one out-of-band invitation so
//! callers holding an invitation get a credential whose trust anchor is
//! that invitation, created once and reused.
//!
//! ## Main Functionality
//! - `InvitationIssuer::credential`: lazily create and cache the credential
//! - `InvitationIssuer::anchors`: check another credential names this invitation
//!
//! ## Last Modified
//! v0.1.0 - Initial invitation issuer

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use super::engine::CredentialEngine;
use super::model::{Credential, Invitation};
use crate::error::Result;

/// Issues invitation-anchored credentials through a shared engine.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use quicvc_core::credential::{CredentialEngine, Invitation, InvitationIssuer};
///
/// let engine = Arc::new(CredentialEngine::new("laptop"));
/// let invitation = Invitation::new("abc123", "aa".repeat(32), "wss://broker");
/// let issuer = InvitationIssuer::new(engine, invitation).unwrap();
///
/// let credential = issuer.credential().unwrap();
/// assert!(issuer.anchors(&credential));
/// ```
#[derive(Debug)]
pub struct InvitationIssuer {
    engine: Arc<CredentialEngine>,
    invitation: Invitation,
    cached: Mutex<Option<Credential>>,
}

impl InvitationIssuer {
    /// Creates an issuer and registers the invitation with the engine.
    ///
    /// # Errors
    /// Returns `MalformedMessage` if the invitation is invalid.
    pub fn new(engine: Arc<CredentialEngine>, invitation: Invitation) -> Result<Self> {
        invitation.validate()?;
        engine.add_invitation(invitation.clone());
        Ok(Self {
            engine,
            invitation,
            cached: Mutex::new(None),
        })
    }

    /// Returns the anchored credential, creating it on first use or after
    /// the cached one expires.
    ///
    /// # Errors
    /// See [`CredentialEngine::create_credential_from_invitation`].
    pub fn credential(&self) -> Result<Credential> {
        let mut cached = self.cached.lock();
        if let Some(existing) = cached.as_ref() {
            if !existing.is_expired_at(Utc::now()) {
                return Ok(existing.clone());
            }
        }
        let fresh = self.engine.create_credential_from_invitation(&self.invitation)?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Returns `true` if `credential` is anchored to this invitation with
    /// the same inviter key.
    #[must_use]
    pub fn anchors(&self, credential: &Credential) -> bool {
        let subject = &credential.credential_subject;
        subject.invitation_token.as_deref() == Some(self.invitation.token.as_str())
            && subject.inviter_public_key.as_deref() == Some(self.invitation.public_key.as_str())
    }

    /// Returns the invitation token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.invitation.token
    }

    /// Returns the invitation.
    #[must_use]
    pub fn invitation(&self) -> &Invitation {
        &self.invitation
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<CredentialEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::model::TrustLevel;

    fn invitation() -> Invitation {
        Invitation::new("abc123", "aa".repeat(32), "wss://broker")
    }

    #[test]
    fn test_credential_is_cached() {
        let engine = Arc::new(CredentialEngine::new("laptop"));
        let issuer = InvitationIssuer::new(engine.clone(), invitation()).unwrap();

        let first = issuer.credential().unwrap();
        let second = issuer.credential().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(engine.local_credential().unwrap().id, first.id);
    }

    #[test]
    fn test_registers_invitation() {
        let engine = Arc::new(CredentialEngine::new("laptop"));
        let issuer = InvitationIssuer::new(engine.clone(), invitation()).unwrap();
        assert_eq!(issuer.token(), "abc123");
        assert!(engine.get_invitation("abc123").is_some());
    }

    #[test]
    fn test_anchors_peer_credential() {
        let ours = InvitationIssuer::new(Arc::new(CredentialEngine::new("a")), invitation()).unwrap();
        let theirs = InvitationIssuer::new(Arc::new(CredentialEngine::new("b")), invitation()).unwrap();

        let credential = theirs.credential().unwrap();
        assert!(ours.anchors(&credential));
        assert_eq!(
            ours.engine().verify_credential(&credential),
            Ok(TrustLevel::Invitation)
        );

        let other = InvitationIssuer::new(
            Arc::new(CredentialEngine::new("c")),
            Invitation::new("zzz", "bb".repeat(32), "wss://broker"),
        )
        .unwrap();
        assert!(!ours.anchors(&other.credential().unwrap()));
    }

    #[test]
    fn test_rejects_invalid_invitation() {
        let engine = Arc::new(CredentialEngine::new("laptop"));
        assert!(InvitationIssuer::new(engine, Invitation::new("", "aa", "")).is_err());
    }
}
