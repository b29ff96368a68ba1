//! On-the-wire framing for the UDP duplex audio protocol.
//!
//! Packet layout:
//!   0:     u8  packet type
//!   1..5:  u32 payload length, big-endian
//!   5..:   payload bytes
//!
//! Fragment payloads (type `TtsMp3Fragment`) carry an inner header before the
//! MP3 bytes:
//!   0..16:  session_id (16 bytes, fixed)
//!   16..20: chunk_index (u32, big-endian)
//!   20..22: fragment_index (u16, big-endian)
//!   22..24: fragment_count (u16, big-endian)
//!
//! This module never allocates beyond what is needed to hold one datagram; it
//! has no knowledge of client identity or session state.

use thiserror::Error;

/// Header size: 1 byte type + 4 byte length.
pub const HEADER_LEN: usize = 5;

/// Inner fragment header size: 16 (session id) + 4 (chunk_index) + 2 (fragment_index) + 2 (fragment_count).
pub const FRAGMENT_HEADER_LEN: usize = 24;

/// Conservative UDP payload ceiling used throughout the gateway to stay under
/// common path MTUs after IP/UDP headers.
pub const MAX_DATAGRAM_BYTES: usize = 1400;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    ControlHello,
    CompressionAdpcm,
    CompressionTtsMp3,
    CompressionTtsMp3Fragment,
    ControlReset,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::ControlHello),
            1 => Some(Self::CompressionAdpcm),
            2 => Some(Self::CompressionTtsMp3),
            3 => Some(Self::CompressionTtsMp3Fragment),
            4 => Some(Self::ControlReset),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::ControlHello => 0,
            Self::CompressionAdpcm => 1,
            Self::CompressionTtsMp3 => 2,
            Self::CompressionTtsMp3Fragment => 3,
            Self::ControlReset => 4,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet shorter than header ({0} bytes)")]
    TooShort(usize),
    #[error("declared length {declared} does not match remaining bytes {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("unknown packet type byte {0}")]
    UnknownType(u8),
}

/// A decoded packet borrowed from the original datagram buffer. Never copies
/// the payload; callers slice further as needed.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet<'a> {
    pub kind: PacketType,
    pub payload: &'a [u8],
}

/// Parse one datagram. Malformed input is reported, never panics.
pub fn parse(datagram: &[u8]) -> Result<Packet<'_>, WireError> {
    if datagram.len() < HEADER_LEN {
        return Err(WireError::TooShort(datagram.len()));
    }
    let type_byte = datagram[0];
    let declared_len = u32::from_be_bytes([datagram[1], datagram[2], datagram[3], datagram[4]]);
    let remaining = datagram.len() - HEADER_LEN;
    if declared_len as usize != remaining {
        return Err(WireError::LengthMismatch { declared: declared_len, actual: remaining });
    }
    let kind = PacketType::from_byte(type_byte).ok_or(WireError::UnknownType(type_byte))?;
    Ok(Packet { kind, payload: &datagram[HEADER_LEN..] })
}

/// Encode a packet of the given type into a fresh buffer.
pub fn encode(kind: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(kind.to_byte());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Metadata carried by a single TTS fragment, prefixed to the MP3 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    pub session_id: [u8; 16],
    pub chunk_index: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
}

impl FragmentHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.session_id);
        out.extend_from_slice(&self.chunk_index.to_be_bytes());
        out.extend_from_slice(&self.fragment_index.to_be_bytes());
        out.extend_from_slice(&self.fragment_count.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if buf.len() < FRAGMENT_HEADER_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        let mut session_id = [0u8; 16];
        session_id.copy_from_slice(&buf[0..16]);
        let chunk_index = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let fragment_index = u16::from_be_bytes(buf[20..22].try_into().unwrap());
        let fragment_count = u16::from_be_bytes(buf[22..24].try_into().unwrap());
        Ok((
            Self { session_id, chunk_index, fragment_index, fragment_count },
            &buf[FRAGMENT_HEADER_LEN..],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_hello_packet() {
        let bytes = encode(PacketType::ControlHello, &[]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.kind, PacketType::ControlHello);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn round_trips_adpcm_payload() {
        let payload = vec![0xAB; 128];
        let bytes = encode(PacketType::CompressionAdpcm, &payload);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.kind, PacketType::CompressionAdpcm);
        assert_eq!(parsed.payload, payload.as_slice());
    }

    #[test]
    fn rejects_short_packets() {
        let err = parse(&[0u8; 3]).unwrap_err();
        assert_eq!(err, WireError::TooShort(3));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = encode(PacketType::CompressionAdpcm, &[1, 2, 3, 4]);
        // Lie about the length.
        bytes[1..5].copy_from_slice(&100u32.to_be_bytes());
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, WireError::LengthMismatch { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = encode(PacketType::ControlHello, &[]);
        bytes[0] = 99;
        let err = parse(&bytes).unwrap_err();
        assert_eq!(err, WireError::UnknownType(99));
    }

    #[test]
    fn fragment_header_round_trips() {
        let hdr = FragmentHeader {
            session_id: [7u8; 16],
            chunk_index: 42,
            fragment_index: 1,
            fragment_count: 3,
        };
        let mut buf = Vec::new();
        hdr.encode(&mut buf);
        buf.extend_from_slice(b"mp3-bytes");
        let (parsed, rest) = FragmentHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(rest, b"mp3-bytes");
    }
}
