//! Binary frame format for uRPC.
//!
//! Frame layout (28-byte header + optional payload, all fields big-endian):
//!
//! ```text
//! +--------+---------+------+-------+----------+-----------+-----------+--------+
//! | magic  | version | type | flags | reserved | stream_id | method_id | length |
//! | 4 bytes| 1 byte  |1 byte|2 bytes| 4 bytes  |  4 bytes  |  8 bytes  | 4 bytes|
//! +--------+---------+------+-------+----------+-----------+-----------+--------+
//! | payload (length bytes)                                                      |
//! +-----------------------------------------------------------------------------+
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut};

/// Magic identifying uRPC frames: "URPC".
pub const MAGIC: u32 = 0x5552_5043;

/// Size of the fixed frame header in bytes (4+1+1+2+4+4+8+4 = 28).
pub const FRAME_HEADER_SIZE: usize = 28;

/// Frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Request = 0,
    Response = 1,
    /// Reserved; never emitted, ignored on receipt.
    Stream = 2,
    Cancel = 3,
    Ping = 4,
    Pong = 5,
}

impl FrameType {
    /// Maps a wire byte to a frame type. Unknown values yield `None` and
    /// are ignored by readers.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameType::Request),
            1 => Some(FrameType::Response),
            2 => Some(FrameType::Stream),
            3 => Some(FrameType::Cancel),
            4 => Some(FrameType::Ping),
            5 => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// Frame flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// Final frame of the stream.
    pub const END_STREAM: u16 = 0x01;
    /// Response payload is an error payload.
    pub const ERROR: u16 = 0x02;
    /// Payload is compressed (reserved for future use).
    pub const COMPRESSED: u16 = 0x04;
    /// Transport hint: frame travelled over TLS.
    pub const TLS: u16 = 0x08;
    /// Transport hint: peer was mutually authenticated.
    pub const MTLS: u16 = 0x10;
    /// Payload is `IV[12] || ciphertext || tag[16]` under the app cipher.
    pub const ENCRYPTED: u16 = 0x20;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn with_end_stream(mut self) -> Self {
        self.0 |= Self::END_STREAM;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.0 |= Self::ERROR;
        self
    }

    pub fn with_encrypted(mut self) -> Self {
        self.0 |= Self::ENCRYPTED;
        self
    }

    /// Merges transport hint bits (TLS/MTLS) into the flag set.
    pub fn with_hints(mut self, hint_bits: u16) -> Self {
        self.0 |= hint_bits & (Self::TLS | Self::MTLS);
        self
    }

    pub fn is_end_stream(&self) -> bool {
        self.0 & Self::END_STREAM != 0
    }

    pub fn is_error(&self) -> bool {
        self.0 & Self::ERROR != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn is_tls(&self) -> bool {
        self.0 & Self::TLS != 0
    }

    pub fn is_mtls(&self) -> bool {
        self.0 & Self::MTLS != 0
    }

    pub fn bits(&self) -> u16 {
        self.0
    }
}

/// A parsed uRPC frame header.
///
/// The codec performs no validation; `validate` checks magic and version
/// for readers, and `frame_type` resolves the raw type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u8,
    pub frame_type: u8,
    pub flags: FrameFlags,
    pub stream_id: u32,
    pub method_id: u64,
    pub length: u32,
}

impl FrameHeader {
    /// Creates a header for an outbound frame with the current magic and
    /// protocol version.
    pub fn new(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        method_id: u64,
        length: u32,
    ) -> Self {
        Self {
            magic: MAGIC,
            version: crate::PROTOCOL_VERSION,
            frame_type: frame_type as u8,
            flags,
            stream_id,
            method_id,
            length,
        }
    }

    /// Encodes the header into its 28-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.magic);
        buf.put_u8(self.version);
        buf.put_u8(self.frame_type);
        buf.put_u16(self.flags.bits());
        // reserved: senders write zero
        buf.put_u32(0);
        buf.put_u32(self.stream_id);
        buf.put_u64(self.method_id);
        buf.put_u32(self.length);
        out
    }

    /// Parses a header from the first 28 bytes of `data`.
    ///
    /// Field values are taken as-is; invalid magic/version are detected by
    /// callers via `validate`.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::IncompleteHeader { got: data.len() });
        }

        let mut buf = data;
        let magic = buf.get_u32();
        let version = buf.get_u8();
        let frame_type = buf.get_u8();
        let flags = FrameFlags::from_bits(buf.get_u16());
        // reserved: receivers ignore
        let _ = buf.get_u32();
        let stream_id = buf.get_u32();
        let method_id = buf.get_u64();
        let length = buf.get_u32();

        Ok(Self {
            magic,
            version,
            frame_type,
            flags,
            stream_id,
            method_id,
            length,
        })
    }

    /// Checks magic and version. Readers shut the connection down on error.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        if self.version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    /// Resolves the raw type byte; `None` for unknown types.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hdr = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new().with_end_stream(),
            42,
            0xdead_beef_cafe_f00d,
            1024,
        );

        let wire = hdr.encode();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE);

        let parsed = FrameHeader::parse(&wire).unwrap();
        assert_eq!(parsed, hdr);
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.frame_type(), Some(FrameType::Request));
    }

    #[test]
    fn test_header_wire_layout() {
        let hdr = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream(),
            7,
            0,
            0,
        );
        let wire = hdr.encode();

        assert_eq!(&wire[0..4], b"URPC");
        assert_eq!(wire[4], 1); // version
        assert_eq!(wire[5], 4); // Ping
        assert_eq!(&wire[6..8], &[0x00, 0x01]); // flags
        assert_eq!(&wire[8..12], &[0, 0, 0, 0]); // reserved
        assert_eq!(&wire[12..16], &[0, 0, 0, 7]); // stream_id
        assert_eq!(&wire[16..24], &[0; 8]); // method_id
        assert_eq!(&wire[24..28], &[0, 0, 0, 0]); // length
    }

    #[test]
    fn test_parse_is_validation_free() {
        let mut wire = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new(),
            1,
            2,
            3,
        )
        .encode();
        wire[0] = b'X'; // corrupt magic
        wire[4] = 99; // bogus version
        wire[5] = 0xEE; // unknown type

        let parsed = FrameHeader::parse(&wire).unwrap();
        assert!(parsed.validate().is_err());
        assert_eq!(parsed.frame_type(), None);
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let mut hdr = FrameHeader::new(FrameType::Request, FrameFlags::new(), 1, 2, 0);
        hdr.version = 2;
        assert!(matches!(
            hdr.validate(),
            Err(ProtocolError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_reserved_ignored_on_parse() {
        let hdr = FrameHeader::new(FrameType::Response, FrameFlags::new(), 9, 9, 9);
        let mut wire = hdr.encode();
        wire[8..12].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let parsed = FrameHeader::parse(&wire).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn test_max_length_roundtrip() {
        let hdr = FrameHeader::new(
            FrameType::Response,
            FrameFlags::new().with_end_stream(),
            1,
            1,
            u32::MAX,
        );
        let parsed = FrameHeader::parse(&hdr.encode()).unwrap();
        assert_eq!(parsed.length, u32::MAX);
    }

    #[test]
    fn test_short_input() {
        let result = FrameHeader::parse(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteHeader { got: 10 })
        ));
    }

    #[test]
    fn test_frame_type_mapping() {
        assert_eq!(FrameType::from_u8(0), Some(FrameType::Request));
        assert_eq!(FrameType::from_u8(5), Some(FrameType::Pong));
        assert_eq!(FrameType::from_u8(6), None);
        assert_eq!(FrameType::from_u8(0xFF), None);
    }

    #[test]
    fn test_flags() {
        let flags = FrameFlags::new()
            .with_end_stream()
            .with_error()
            .with_encrypted();
        assert!(flags.is_end_stream());
        assert!(flags.is_error());
        assert!(flags.is_encrypted());
        assert!(!flags.is_tls());
        assert_eq!(flags.bits(), 0x23);

        let hinted = FrameFlags::new()
            .with_end_stream()
            .with_hints(FrameFlags::TLS | FrameFlags::MTLS | 0x8000);
        assert!(hinted.is_tls());
        assert!(hinted.is_mtls());
        // with_hints only admits the hint bits
        assert_eq!(hinted.bits(), 0x19);
    }
}
