// ============================================
// File: crates/quicvc-core/src/credential/mod.rs
// ============================================
//! # Credential Module
//!
//! ## Creation Reason
//! Peer authentication for QUICVC without a central certificate authority:
//! each device signs its own credential, optionally anchored to an
//! out-of-band invitation.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`model`]: Credential, invitation and verified-peer types
//! - [`engine`]: Issuance and verification (`CredentialEngine`)
//! - [`invitation`]: Invitation-anchored issuer (`InvitationIssuer`)
//! - [`exchange`]: `vc_request`/`vc_response`/`vc_ack`/`vc_error` flow
//!
//! ## Trust Levels
//! | Level | Condition |
//! |-------|-----------|
//! | `invitation` | `credentialSubject.invitationToken` present |
//! | `direct` | `issuer == credentialSubject.id` |
//! | `chain` | anything else that verifies |
//!
//! ## Last Modified
//! v0.1.0 - Initial credential module

pub mod engine;
pub mod exchange;
pub mod invitation;
pub mod model;

pub use engine::CredentialEngine;
pub use exchange::{handle_message, start_exchange, ExchangeEvent, ExchangeStep, VcMessage};
pub use invitation::InvitationIssuer;
pub use model::{Credential, CredentialSubject, Invitation, Proof, TrustLevel, VerifiedPeer};
