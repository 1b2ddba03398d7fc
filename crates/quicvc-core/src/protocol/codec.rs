// ============================================
// File: crates/quicvc-core/src/protocol/codec.rs
// ============================================
//! # Packet Header Codec
//!
//! ## Creation Reason
//! Serializes and parses the fixed binary header that prefixes every
//! QUICVC datagram.
//!
//! ## Main Functionality
//! - `PacketType`: INITIAL / HANDSHAKE / PROTECTED / RETRY
//! - `PacketHeader`: type, version, connection IDs, packet number
//! - `Codec` trait + `HeaderCodec` implementation
//! - `parse_packet`: zero-copy split into header, AAD bytes and payload
//!
//! ## Wire Format
//! ```text
//! ┌──────┬─────────┬────────┬────────┬──────────┬──────────┬──────────────┐
//! │ type │ version │ dcidLen│ scidLen│   dcid   │   scid   │ packetNumber │
//! │  u8  │ u32 BE  │   u8   │   u8   │ dcidLen  │ scidLen  │    u64 BE    │
//! └──────┴─────────┴────────┴────────┴──────────┴──────────┴──────────────┘
//!   followed by the frame payload up to the end of the datagram
//! ```
//! One datagram carries exactly one packet.
//!
//! ## Parsing Strategy
//! 1. Require the 7-byte prefix (type, version, both lengths)
//! 2. Require `15 + dcidLen + scidLen` bytes before reading anything else
//! 3. Map the type byte to `PacketType`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate buffer lengths before reading
//! - Parse failures are dropped silently by the receive path
//!
//! ## Last Modified
//! v0.1.0 - Initial header codec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use quicvc_common::types::ConnectionId;

use super::version::ProtocolVersion;
use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Fixed header bytes excluding the connection IDs.
pub const HEADER_FIXED_SIZE: usize = 1 + 4 + 1 + 1 + 8;

/// Bytes needed to read both connection ID lengths.
const LENGTH_PREFIX_SIZE: usize = 1 + 4 + 1 + 1;

/// Maximum length of one connection ID on the wire.
pub const MAX_CID_LEN: usize = u8::MAX as usize;

/// Largest datagram the codec will produce or accept.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// ============================================
// PacketType
// ============================================

/// Packet type tag (first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client's first packet, carries `VC_INIT`.
    Initial = 0x00,
    /// Server's reply, carries `VC_RESPONSE`.
    Handshake = 0x01,
    /// Post-handshake packet with sealed application frames.
    Protected = 0x02,
    /// Reserved; logged and dropped.
    Retry = 0x03,
}

impl PacketType {
    /// Converts a byte to a `PacketType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Initial),
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::Protected),
            0x03 => Some(Self::Retry),
            _ => None,
        }
    }

    /// Converts the `PacketType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initial => "INITIAL",
            Self::Handshake => "HANDSHAKE",
            Self::Protected => "PROTECTED",
            Self::Retry => "RETRY",
        })
    }
}

// ============================================
// PacketHeader
// ============================================

/// Parsed packet header.
///
/// Connection IDs are stored as raw bytes so any length up to 255 round
/// trips; QUICVC peers always use 16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    packet_type: PacketType,
    version: ProtocolVersion,
    dcid: Bytes,
    scid: Bytes,
    packet_number: u64,
}

impl PacketHeader {
    /// Creates a header with arbitrary connection ID bytes.
    ///
    /// # Errors
    /// Returns `MalformedMessage` if either ID exceeds 255 bytes.
    pub fn new(
        packet_type: PacketType,
        version: ProtocolVersion,
        dcid: impl Into<Bytes>,
        scid: impl Into<Bytes>,
        packet_number: u64,
    ) -> Result<Self> {
        let dcid = dcid.into();
        let scid = scid.into();
        if dcid.len() > MAX_CID_LEN || scid.len() > MAX_CID_LEN {
            return Err(CoreError::malformed(format!(
                "connection id too long: dcid {} scid {}",
                dcid.len(),
                scid.len()
            )));
        }
        Ok(Self {
            packet_type,
            version,
            dcid,
            scid,
            packet_number,
        })
    }

    /// Creates a current-version header from 16-byte connection IDs.
    #[must_use]
    pub fn for_connection(
        packet_type: PacketType,
        dcid: &ConnectionId,
        scid: &ConnectionId,
        packet_number: u64,
    ) -> Self {
        Self {
            packet_type,
            version: ProtocolVersion::current(),
            dcid: Bytes::copy_from_slice(dcid.as_bytes()),
            scid: Bytes::copy_from_slice(scid.as_bytes()),
            packet_number,
        }
    }

    /// Returns the packet type.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Returns the protocol version.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Returns the destination connection ID bytes.
    #[must_use]
    pub fn dcid(&self) -> &[u8] {
        &self.dcid
    }

    /// Returns the source connection ID bytes.
    #[must_use]
    pub fn scid(&self) -> &[u8] {
        &self.scid
    }

    /// Returns the destination ID if it is a 16-byte QUICVC ID.
    #[must_use]
    pub fn dcid_id(&self) -> Option<ConnectionId> {
        ConnectionId::from_bytes(&self.dcid)
    }

    /// Returns the source ID if it is a 16-byte QUICVC ID.
    #[must_use]
    pub fn scid_id(&self) -> Option<ConnectionId> {
        ConnectionId::from_bytes(&self.scid)
    }

    /// Returns the packet number.
    #[must_use]
    pub const fn packet_number(&self) -> u64 {
        self.packet_number
    }

    /// Returns the encoded header length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_FIXED_SIZE + self.dcid.len() + self.scid.len()
    }
}

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding wire structures.
pub trait Codec<T> {
    /// Encodes a value into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a value from bytes, advancing the buffer.
    ///
    /// # Errors
    /// Returns an error if the input is truncated or invalid.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

/// Codec for [`PacketHeader`].
#[derive(Debug, Default, Clone)]
pub struct HeaderCodec;

impl HeaderCodec {
    /// Creates a new header codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the header length a buffer claims, validating it is present.
    ///
    /// # Errors
    /// `MessageTooShort` if the buffer cannot hold the claimed header.
    pub fn header_len(buf: &[u8]) -> Result<usize> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Err(CoreError::too_short(HEADER_FIXED_SIZE, buf.len()));
        }
        let required = HEADER_FIXED_SIZE + usize::from(buf[5]) + usize::from(buf[6]);
        if buf.len() < required {
            return Err(CoreError::too_short(required, buf.len()));
        }
        Ok(required)
    }
}

impl Codec<PacketHeader> for HeaderCodec {
    fn encode(&self, msg: &PacketHeader, buf: &mut BytesMut) {
        buf.reserve(msg.encoded_len());
        buf.put_u8(msg.packet_type.as_byte());
        buf.put_u32(msg.version.as_u32());
        // Lengths were bounded by the constructors.
        buf.put_u8(u8::try_from(msg.dcid.len()).unwrap_or(u8::MAX));
        buf.put_u8(u8::try_from(msg.scid.len()).unwrap_or(u8::MAX));
        buf.put_slice(&msg.dcid);
        buf.put_slice(&msg.scid);
        buf.put_u64(msg.packet_number);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<PacketHeader> {
        Self::header_len(buf)?;

        let type_byte = buf.get_u8();
        let version = ProtocolVersion::new(buf.get_u32());
        let dcid_len = usize::from(buf.get_u8());
        let scid_len = usize::from(buf.get_u8());
        let dcid = buf.split_to(dcid_len);
        let scid = buf.split_to(scid_len);
        let packet_number = buf.get_u64();

        let packet_type =
            PacketType::from_byte(type_byte).ok_or(CoreError::UnknownPacketType(type_byte))?;

        Ok(PacketHeader {
            packet_type,
            version,
            dcid,
            scid,
            packet_number,
        })
    }
}

// ============================================
// Packets
// ============================================

/// A datagram split into header and payload without copying the payload.
#[derive(Debug)]
pub struct ParsedPacket<'a> {
    /// Decoded header.
    pub header: PacketHeader,
    /// Raw header bytes, used as AAD for `PROTECTED` payloads.
    pub header_bytes: &'a [u8],
    /// Frame payload.
    pub payload: &'a [u8],
}

/// Encodes a header into a standalone buffer.
#[must_use]
pub fn encode_header(header: &PacketHeader) -> BytesMut {
    let mut buf = BytesMut::with_capacity(header.encoded_len());
    HeaderCodec.encode(header, &mut buf);
    buf
}

/// Encodes a full packet: header followed by payload.
///
/// # Errors
/// `MessageTooLarge` if the result would not fit in one datagram.
pub fn encode_packet(header: &PacketHeader, payload: &[u8]) -> Result<BytesMut> {
    let total = header.encoded_len() + payload.len();
    if total > MAX_DATAGRAM_SIZE {
        return Err(CoreError::MessageTooLarge {
            max: MAX_DATAGRAM_SIZE,
            actual: total,
        });
    }
    let mut buf = BytesMut::with_capacity(total);
    HeaderCodec.encode(header, &mut buf);
    buf.put_slice(payload);
    Ok(buf)
}

/// Parses a datagram into header and payload.
///
/// # Errors
/// `MessageTooShort` for truncated headers, `UnknownPacketType` for an
/// unrecognised type byte.
pub fn parse_packet(datagram: &[u8]) -> Result<ParsedPacket<'_>> {
    let header_len = HeaderCodec::header_len(datagram)?;
    let (header_bytes, payload) = datagram.split_at(header_len);
    let header = HeaderCodec.decode(&mut Bytes::copy_from_slice(header_bytes))?;
    Ok(ParsedPacket {
        header,
        header_bytes,
        payload,
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(header: &PacketHeader) -> PacketHeader {
        let encoded = encode_header(header);
        assert_eq!(encoded.len(), header.encoded_len());
        parse_packet(&encoded).unwrap().header
    }

    #[test]
    fn test_header_roundtrip_connection_ids() {
        let header = PacketHeader::for_connection(
            PacketType::Initial,
            &ConnectionId::generate(),
            &ConnectionId::generate(),
            0,
        );
        assert_eq!(roundtrip(&header), header);
        assert_eq!(header.encoded_len(), 15 + 32);
    }

    #[test]
    fn test_header_roundtrip_edge_lengths() {
        for (dcid_len, scid_len) in [(0, 0), (0, 255), (255, 0), (255, 255), (1, 20)] {
            let header = PacketHeader::new(
                PacketType::Protected,
                ProtocolVersion::new(0xDEAD_BEEF),
                vec![0xAA; dcid_len],
                vec![0xBB; scid_len],
                u64::MAX,
            )
            .unwrap();
            assert_eq!(roundtrip(&header), header);
        }
    }

    #[test]
    fn test_header_rejects_oversized_cid() {
        assert!(PacketHeader::new(
            PacketType::Initial,
            ProtocolVersion::current(),
            vec![0u8; 256],
            Vec::new(),
            1
        )
        .is_err());
    }

    #[test]
    fn test_big_endian_layout() {
        let header = PacketHeader::new(
            PacketType::Handshake,
            ProtocolVersion::new(0x0102_0304),
            vec![0x11],
            vec![0x22, 0x33],
            0x0A0B,
        )
        .unwrap();
        let bytes = encode_header(&header);
        assert_eq!(
            &bytes[..],
            &[0x01, 1, 2, 3, 4, 1, 2, 0x11, 0x22, 0x33, 0, 0, 0, 0, 0, 0, 0x0A, 0x0B]
        );
    }

    #[test]
    fn test_truncated_headers_rejected() {
        assert!(parse_packet(&[]).is_err());
        assert!(parse_packet(&[0x00, 0, 0, 0, 1]).is_err());

        // Claims 16+16 bytes of IDs but carries fewer.
        let mut short = vec![0x00, 0, 0, 0, 1, 16, 16];
        short.extend_from_slice(&[0u8; 30]);
        assert!(matches!(
            parse_packet(&short),
            Err(CoreError::MessageTooShort { expected: 47, .. })
        ));
    }

    #[test]
    fn test_unknown_packet_type() {
        let header = PacketHeader::new(
            PacketType::Initial,
            ProtocolVersion::current(),
            Vec::new(),
            Vec::new(),
            0,
        )
        .unwrap();
        let mut bytes = encode_header(&header);
        bytes[0] = 0x7F;
        assert!(matches!(
            parse_packet(&bytes),
            Err(CoreError::UnknownPacketType(0x7F))
        ));
    }

    #[test]
    fn test_payload_split() {
        let header = PacketHeader::for_connection(
            PacketType::Protected,
            &ConnectionId::generate(),
            &ConnectionId::generate(),
            9,
        );
        let datagram = encode_packet(&header, b"payload").unwrap();
        let parsed = parse_packet(&datagram).unwrap();
        assert_eq!(parsed.payload, b"payload");
        assert_eq!(parsed.header_bytes, &encode_header(&header)[..]);
        assert_eq!(parsed.header.packet_number(), 9);
    }
}
