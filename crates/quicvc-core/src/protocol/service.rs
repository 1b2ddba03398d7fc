// ============================================
// File: crates/quicvc-core/src/protocol/service.rs
// ============================================
//! # Service-Byte Framing
//!
//! ## Creation Reason
//! Direct-auth sessions skip packet headers and connection IDs. Each
//! datagram is a single service byte followed by a JSON body.
//!
//! ## Wire Format
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ service │ JSON body                    │
//! │ 1 byte  │ rest of datagram             │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial service framing

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Leading byte of a direct-auth datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceType {
    /// Device announcement.
    Discovery = 1,
    /// Application payload on a ready session.
    Data = 2,
    /// Liveness probe.
    Heartbeat = 4,
    /// Credential exchange message.
    VcExchange = 7,
}

impl ServiceType {
    /// Converts a byte to a `ServiceType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Discovery),
            2 => Some(Self::Data),
            4 => Some(Self::Heartbeat),
            7 => Some(Self::VcExchange),
            _ => None,
        }
    }

    /// Returns the byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovery => "DISCOVERY",
            Self::Data => "DATA",
            Self::Heartbeat => "HEARTBEAT",
            Self::VcExchange => "VC_EXCHANGE",
        };
        f.write_str(name)
    }
}

/// Body of a `DISCOVERY` datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryAnnouncement {
    /// Announcing device.
    pub device_id: String,
    /// X25519 public key (hex) of the announcing device.
    pub public_key_hex: String,
}

/// Body of a `DATA` datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    /// Sending device.
    pub device_id: String,
    /// Base64 payload.
    pub data: String,
}

/// Body of a direct-auth `HEARTBEAT` datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    /// Sending device.
    pub device_id: String,
    /// Send time in Unix milliseconds.
    pub timestamp: i64,
}

/// Frames `body` behind a service byte.
///
/// # Errors
/// Returns `Json` if `body` fails to serialize.
pub fn encode_service<T: Serialize>(service: ServiceType, body: &T) -> Result<Vec<u8>> {
    let mut out = vec![service.as_byte()];
    serde_json::to_writer(&mut out, body)?;
    Ok(out)
}

/// Splits a datagram into its service type and JSON body.
///
/// # Errors
/// - `MessageTooShort` for an empty datagram
/// - `UnknownServiceType` for an unrecognised leading byte
pub fn decode_service(datagram: &[u8]) -> Result<(ServiceType, &[u8])> {
    let (&first, body) = datagram
        .split_first()
        .ok_or(CoreError::too_short(1, 0))?;
    let service = ServiceType::from_byte(first).ok_or(CoreError::UnknownServiceType(first))?;
    Ok((service, body))
}

/// Parses a service body.
///
/// # Errors
/// Returns `Json` if the body does not match `T`.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::VcMessage;

    #[test]
    fn test_vc_exchange_datagram_layout() {
        let msg = VcMessage::Ack { device_id: "d".into() };
        let datagram = encode_service(ServiceType::VcExchange, &msg).unwrap();
        assert_eq!(datagram[0], 7);

        let (service, body) = decode_service(&datagram).unwrap();
        assert_eq!(service, ServiceType::VcExchange);
        assert_eq!(parse_body::<VcMessage>(body).unwrap(), msg);
    }

    #[test]
    fn test_unknown_service_byte() {
        assert!(matches!(
            decode_service(&[9, b'{', b'}']),
            Err(CoreError::UnknownServiceType(9))
        ));
        assert!(decode_service(&[]).is_err());
    }

    #[test]
    fn test_discovery_body_is_camel_case() {
        let datagram = encode_service(
            ServiceType::Discovery,
            &DiscoveryAnnouncement {
                device_id: "a".into(),
                public_key_hex: "ff".into(),
            },
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&datagram[1..]).unwrap();
        assert_eq!(json["deviceId"], "a");
        assert_eq!(json["publicKeyHex"], "ff");
    }
}
