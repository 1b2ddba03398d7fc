// ============================================
// File: crates/quicvc-core/src/protocol/frames.rs
// ============================================
//! # Frames
//!
//! ## Creation Reason
//! Defines the frames carried inside packet payloads as one closed enum,
//! plus the JSON encoding used on the wire.
//!
//! ## Main Functionality
//! - `FrameType`: numeric frame tags
//! - `Frame`: typed frame values (`Unknown` for forward compatibility)
//! - `encode_frames` / `decode_frames`: payload <-> `Vec<Frame>`
//!
//! ## Payload Encoding
//! ```text
//! [ { "type": 16, "credential": {...}, "challenge": "<hex>", "timestamp": 1700000000000 },
//!   { "type": 8,  "streamId": 0, "offset": 0, "data": "<base64>" } ]
//! ```
//! A payload is a JSON array of frame objects keyed by numeric `type`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Unknown frame types decode to `Frame::Unknown` and are skipped by
//!   receivers; they never fail the whole payload
//! - A known type with missing fields IS an error (malformed frame)
//!
//! ## Last Modified
//! v0.1.0 - Initial frame definitions

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use quicvc_common::time::Timestamp;
use quicvc_common::types::Challenge;

use crate::credential::model::Credential;
use crate::error::{CoreError, Result};

// ============================================
// FrameType
// ============================================

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Acknowledgement of a packet number.
    Ack = 0x02,
    /// Application stream data.
    Stream = 0x08,
    /// Client credential + challenge.
    VcInit = 0x10,
    /// Server credential.
    VcResponse = 0x11,
    /// Credential accepted.
    VcAck = 0x12,
    /// Liveness probe / reply.
    Heartbeat = 0x20,
}

impl FrameType {
    /// Converts a byte to a `FrameType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(Self::Ack),
            0x08 => Some(Self::Stream),
            0x10 => Some(Self::VcInit),
            0x11 => Some(Self::VcResponse),
            0x12 => Some(Self::VcAck),
            0x20 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// Converts the `FrameType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

// ============================================
// Frame
// ============================================

/// A frame carried in a packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens the handshake (INITIAL).
    VcInit {
        /// Client credential.
        credential: Box<Credential>,
        /// Client challenge.
        challenge: Challenge,
        /// Send time.
        timestamp: Timestamp,
    },
    /// Answers the handshake (HANDSHAKE).
    VcResponse {
        /// Server credential.
        credential: Box<Credential>,
        /// Echo of the client challenge.
        challenge: Challenge,
    },
    /// Credential accepted.
    VcAck {
        /// Accepting device.
        device_id: String,
    },
    /// Application data.
    Stream {
        /// Stream identifier.
        stream_id: u64,
        /// Byte offset of `data` within the stream.
        offset: u64,
        /// Opaque payload.
        data: Vec<u8>,
    },
    /// Acknowledges the highest packet number seen.
    Ack {
        /// Largest acknowledged packet number.
        largest: u64,
    },
    /// Liveness probe (`ack == false`) or reply (`ack == true`).
    Heartbeat {
        /// Send time.
        timestamp: Timestamp,
        /// Probe sequence number.
        sequence: u64,
        /// Set on replies, which are never answered.
        ack: bool,
    },
    /// A frame type this build does not understand.
    Unknown(u8),
}

impl Frame {
    /// Returns the numeric tag of this frame.
    #[must_use]
    pub const fn type_byte(&self) -> u8 {
        match self {
            Self::VcInit { .. } => FrameType::VcInit.as_byte(),
            Self::VcResponse { .. } => FrameType::VcResponse.as_byte(),
            Self::VcAck { .. } => FrameType::VcAck.as_byte(),
            Self::Stream { .. } => FrameType::Stream.as_byte(),
            Self::Ack { .. } => FrameType::Ack.as_byte(),
            Self::Heartbeat { .. } => FrameType::Heartbeat.as_byte(),
            Self::Unknown(t) => *t,
        }
    }
}

// ============================================
// Wire Representation
// ============================================

/// Flat JSON shape shared by all frame types.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    #[serde(rename = "type")]
    frame_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential: Option<Box<Credential>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    largest: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack: Option<bool>,
}

fn missing(frame: &str, field: &str) -> CoreError {
    CoreError::malformed(format!("{frame} frame missing '{field}'"))
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        let mut wire = Self {
            frame_type: frame.type_byte(),
            ..Self::default()
        };
        match frame {
            Frame::VcInit {
                credential,
                challenge,
                timestamp,
            } => {
                wire.credential = Some(credential.clone());
                wire.challenge = Some(*challenge);
                wire.timestamp = Some(*timestamp);
            }
            Frame::VcResponse {
                credential,
                challenge,
            } => {
                wire.credential = Some(credential.clone());
                wire.challenge = Some(*challenge);
            }
            Frame::VcAck { device_id } => wire.device_id = Some(device_id.clone()),
            Frame::Stream {
                stream_id,
                offset,
                data,
            } => {
                wire.stream_id = Some(*stream_id);
                wire.offset = Some(*offset);
                wire.data = Some(BASE64.encode(data));
            }
            Frame::Ack { largest } => wire.largest = Some(*largest),
            Frame::Heartbeat {
                timestamp,
                sequence,
                ack,
            } => {
                wire.timestamp = Some(*timestamp);
                wire.sequence = Some(*sequence);
                wire.ack = Some(*ack);
            }
            Frame::Unknown(_) => {}
        }
        wire
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = CoreError;

    fn try_from(wire: WireFrame) -> Result<Self> {
        let Some(frame_type) = FrameType::from_byte(wire.frame_type) else {
            return Ok(Self::Unknown(wire.frame_type));
        };

        Ok(match frame_type {
            FrameType::VcInit => Self::VcInit {
                credential: wire.credential.ok_or_else(|| missing("VC_INIT", "credential"))?,
                challenge: wire.challenge.ok_or_else(|| missing("VC_INIT", "challenge"))?,
                timestamp: wire.timestamp.ok_or_else(|| missing("VC_INIT", "timestamp"))?,
            },
            FrameType::VcResponse => Self::VcResponse {
                credential: wire.credential.ok_or_else(|| missing("VC_RESPONSE", "credential"))?,
                challenge: wire.challenge.ok_or_else(|| missing("VC_RESPONSE", "challenge"))?,
            },
            FrameType::VcAck => Self::VcAck {
                device_id: wire.device_id.ok_or_else(|| missing("VC_ACK", "deviceId"))?,
            },
            FrameType::Stream => Self::Stream {
                stream_id: wire.stream_id.ok_or_else(|| missing("STREAM", "streamId"))?,
                offset: wire.offset.unwrap_or(0),
                data: BASE64
                    .decode(wire.data.ok_or_else(|| missing("STREAM", "data"))?)
                    .map_err(|e| CoreError::malformed(format!("STREAM data: {e}")))?,
            },
            FrameType::Ack => Self::Ack {
                largest: wire.largest.ok_or_else(|| missing("ACK", "largest"))?,
            },
            FrameType::Heartbeat => Self::Heartbeat {
                timestamp: wire.timestamp.ok_or_else(|| missing("HEARTBEAT", "timestamp"))?,
                sequence: wire.sequence.unwrap_or(0),
                ack: wire.ack.unwrap_or(false),
            },
        })
    }
}

// ============================================
// Payload Encoding
// ============================================

/// Encodes frames as a payload.
///
/// # Errors
/// Returns `Json` if serialization fails.
pub fn encode_frames(frames: &[Frame]) -> Result<Vec<u8>> {
    let wire: Vec<WireFrame> = frames.iter().map(WireFrame::from).collect();
    Ok(serde_json::to_vec(&wire)?)
}

/// Decodes a payload into frames.
///
/// # Errors
/// Returns `Json` for invalid JSON and `MalformedMessage` for a known
/// frame type with missing fields.
pub fn decode_frames(payload: &[u8]) -> Result<Vec<Frame>> {
    let wire: Vec<WireFrame> = serde_json::from_slice(payload)?;
    wire.into_iter().map(Frame::try_from).collect()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialEngine;

    #[test]
    fn test_stream_frame_wire_shape() {
        let frames = vec![Frame::Stream {
            stream_id: 3,
            offset: 10,
            data: b"hi".to_vec(),
        }];
        let payload = encode_frames(&frames).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json[0]["type"], 0x08);
        assert_eq!(json[0]["streamId"], 3);
        assert_eq!(json[0]["data"], "aGk=");
        assert!(json[0].get("credential").is_none());

        assert_eq!(decode_frames(&payload).unwrap(), frames);
    }

    #[test]
    fn test_handshake_frames_decode() {
        let engine = CredentialEngine::new("a");
        let credential = Box::new(engine.create_self_signed_credential().unwrap());
        let challenge = Challenge::generate();

        let frames = vec![
            Frame::VcInit {
                credential: credential.clone(),
                challenge,
                timestamp: Timestamp::now(),
            },
            Frame::VcResponse {
                credential,
                challenge,
            },
            Frame::VcAck { device_id: "a".into() },
        ];
        let decoded = decode_frames(&encode_frames(&frames).unwrap()).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_unknown_frame_type_kept_as_unknown() {
        let decoded =
            decode_frames(br#"[{"type":127,"whatever":1},{"type":2,"largest":5}]"#).unwrap();
        assert_eq!(decoded, vec![Frame::Unknown(127), Frame::Ack { largest: 5 }]);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        assert!(matches!(
            decode_frames(br#"[{"type":8,"data":"aGk="}]"#),
            Err(CoreError::MalformedMessage { .. })
        ));
        assert!(decode_frames(br#"[{"type":8,"streamId":0,"data":"***"}]"#).is_err());
        assert!(decode_frames(b"not json").is_err());
    }

    #[test]
    fn test_heartbeat_defaults() {
        let decoded = decode_frames(br#"[{"type":32,"timestamp":1}]"#).unwrap();
        assert_eq!(
            decoded,
            vec![Frame::Heartbeat {
                timestamp: Timestamp::from_millis(1),
                sequence: 0,
                ack: false
            }]
        );
    }
}
