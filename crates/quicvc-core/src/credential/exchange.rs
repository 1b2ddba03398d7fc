// ============================================
// File: crates/quicvc-core/src/credential/exchange.rs
// ============================================
//! # VC Exchange Protocol
//!
//! ## Creation Reason
//! Transport-agnostic message flow for presenting and verifying
//! credentials. The direct-auth session manager carries these messages
//! inside `VC_EXCHANGE` datagrams.
//!
//! ## Main Logical Flow
//! ```text
//! Requester                                   Responder
//!     │ ── vc_request {deviceId, challenge} ──►   │ ensure_local_credential()
//!     │ ◄── vc_response {credential, challenge} ─ │
//!     │ accept_credential()                       │
//!     │ ── vc_ack {deviceId} ───────────────────► │ Completed
//!     │                                           │
//!     └──── vc_error {reason} on any failure ─────┘ (no automatic retry)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `vc_presentation` is accepted as an alias of `vc_response`
//! - `handle_message` never sends; callers put `reply` on the wire
//!
//! ## Last Modified
//! v0.1.0 - Initial exchange protocol

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quicvc_common::types::Challenge;

use super::engine::CredentialEngine;
use super::model::{Credential, VerifiedPeer};

// ============================================
// Messages
// ============================================

/// Messages of the credential exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VcMessage {
    /// Asks the peer to present its credential.
    #[serde(rename = "vc_request")]
    Request {
        /// Requesting device.
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Optional correlation challenge.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<Challenge>,
    },

    /// Presents a credential.
    #[serde(rename = "vc_response", alias = "vc_presentation")]
    Response {
        /// The presented credential.
        credential: Box<Credential>,
        /// Fresh challenge from the presenter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge: Option<Challenge>,
    },

    /// Exchange completed on the verifying side.
    #[serde(rename = "vc_ack")]
    Ack {
        /// Acknowledging device.
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// Exchange failed.
    #[serde(rename = "vc_error")]
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl VcMessage {
    /// Returns the wire tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "vc_request",
            Self::Response { .. } => "vc_response",
            Self::Ack { .. } => "vc_ack",
            Self::Error { .. } => "vc_error",
        }
    }
}

// ============================================
// Exchange Handling
// ============================================

/// Something the caller should surface after handling a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// A presented credential passed verification.
    PeerVerified(VerifiedPeer),
    /// The peer acknowledged our credential.
    Completed {
        /// Acknowledging device.
        device_id: String,
    },
    /// Verification failed locally or the peer reported an error.
    Failed {
        /// Why the exchange failed.
        reason: String,
    },
}

/// Result of handling one exchange message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeStep {
    /// Message to send back, if any.
    pub reply: Option<VcMessage>,
    /// Notification for the caller, if any.
    pub event: Option<ExchangeEvent>,
}

/// Builds the opening `vc_request` for the local device.
#[must_use]
pub fn start_exchange(engine: &CredentialEngine) -> VcMessage {
    VcMessage::Request {
        device_id: engine.device_id().to_string(),
        challenge: Some(Challenge::generate()),
    }
}

/// Advances the exchange by one inbound message.
pub fn handle_message(engine: &CredentialEngine, message: VcMessage) -> ExchangeStep {
    match message {
        VcMessage::Request { device_id, .. } => {
            debug!(peer = %device_id, "Credential requested");
            match engine.ensure_local_credential() {
                Ok(credential) => ExchangeStep {
                    reply: Some(VcMessage::Response {
                        credential: Box::new(credential),
                        challenge: Some(Challenge::generate()),
                    }),
                    event: None,
                },
                Err(e) => ExchangeStep {
                    reply: Some(VcMessage::Error {
                        reason: format!("no credential available: {e}"),
                    }),
                    event: None,
                },
            }
        }
        VcMessage::Response { credential, .. } => match engine.accept_credential(&credential) {
            Ok(peer) => ExchangeStep {
                reply: Some(VcMessage::Ack {
                    device_id: engine.device_id().to_string(),
                }),
                event: Some(ExchangeEvent::PeerVerified(peer)),
            },
            Err(e) => ExchangeStep {
                reply: Some(VcMessage::Error {
                    reason: e.to_string(),
                }),
                event: Some(ExchangeEvent::Failed {
                    reason: e.to_string(),
                }),
            },
        },
        VcMessage::Ack { device_id } => ExchangeStep {
            reply: None,
            event: Some(ExchangeEvent::Completed { device_id }),
        },
        VcMessage::Error { reason } => {
            warn!(reason = %reason, "Peer reported credential exchange error");
            ExchangeStep {
                reply: None,
                event: Some(ExchangeEvent::Failed { reason }),
            }
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::model::TrustLevel;

    #[test]
    fn test_full_sequence() {
        let requester = CredentialEngine::new("requester");
        let responder = CredentialEngine::new("responder");

        let request = start_exchange(&requester);
        let step = handle_message(&responder, request);
        let response = step.reply.unwrap();
        assert!(matches!(response, VcMessage::Response { challenge: Some(_), .. }));
        assert!(responder.local_credential().is_some());

        let step = handle_message(&requester, response);
        match step.event {
            Some(ExchangeEvent::PeerVerified(peer)) => {
                assert_eq!(peer.device_id, "responder");
                assert_eq!(peer.trust_level, TrustLevel::Direct);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let ack = step.reply.unwrap();

        let step = handle_message(&responder, ack);
        assert_eq!(
            step.event,
            Some(ExchangeEvent::Completed { device_id: "requester".into() })
        );
        assert!(step.reply.is_none());
    }

    #[test]
    fn test_bad_credential_yields_error() {
        let presenter = CredentialEngine::new("presenter");
        let verifier = CredentialEngine::new("verifier");

        let mut credential = presenter.create_self_signed_credential().unwrap();
        credential.credential_subject.device_id = "someone-else".into();

        let step = handle_message(
            &verifier,
            VcMessage::Response {
                credential: Box::new(credential),
                challenge: None,
            },
        );
        assert!(matches!(step.reply, Some(VcMessage::Error { .. })));
        assert!(matches!(step.event, Some(ExchangeEvent::Failed { .. })));
        assert!(verifier.verified_peers().is_empty());
    }

    #[test]
    fn test_wire_tags() {
        let json = serde_json::to_value(VcMessage::Ack { device_id: "x".into() }).unwrap();
        assert_eq!(json["type"], "vc_ack");
        assert_eq!(json["deviceId"], "x");

        let request: VcMessage =
            serde_json::from_str(r#"{"type":"vc_request","deviceId":"d"}"#).unwrap();
        assert_eq!(request.kind(), "vc_request");

        let err: VcMessage = serde_json::from_str(r#"{"type":"vc_error","reason":"nope"}"#).unwrap();
        assert_eq!(err, VcMessage::Error { reason: "nope".into() });
    }

    #[test]
    fn test_presentation_alias() {
        let engine = CredentialEngine::new("a");
        let credential = engine.create_self_signed_credential().unwrap();
        let mut json = serde_json::to_value(VcMessage::Response {
            credential: Box::new(credential),
            challenge: None,
        })
        .unwrap();
        json["type"] = "vc_presentation".into();

        let decoded: VcMessage = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.kind(), "vc_response");
    }

    #[test]
    fn test_peer_error_is_surfaced() {
        let engine = CredentialEngine::new("a");
        let step = handle_message(&engine, VcMessage::Error { reason: "expired".into() });
        assert_eq!(step.event, Some(ExchangeEvent::Failed { reason: "expired".into() }));
    }
}
