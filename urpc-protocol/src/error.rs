//! Protocol error types and the binary error-payload codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Protocol-level errors that can occur during framing.
///
/// All of these are fatal to the connection they occur on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic: expected 'URPC', got {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("incomplete header: got {got} of 28 bytes")]
    IncompleteHeader { got: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("malformed error payload")]
    MalformedErrorPayload,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error codes the core itself emits.
///
/// Application handlers may use any codes they like; these two are part of
/// the protocol contract.
pub mod error_codes {
    /// No handler registered for the requested method id.
    pub const UNKNOWN_METHOD: u32 = 404;
    /// Encrypted payload could not be handled (bad ciphertext or no cipher).
    pub const BAD_ENCRYPTED_PAYLOAD: u32 = 400;
}

/// Binary error payload carried in Response frames with the ERROR flag.
///
/// Layout: u32 code, u32 msg_len, UTF-8 message, opaque trailing details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
    pub details: Bytes,
}

impl ErrorPayload {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Bytes::new(),
        }
    }

    pub fn with_details(mut self, details: Bytes) -> Self {
        self.details = details;
        self
    }

    /// Encodes the payload into its wire form.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(8 + self.message.len() + self.details.len());
        buf.put_u32(self.code);
        buf.put_u32(self.message.len() as u32);
        buf.put_slice(self.message.as_bytes());
        buf.put_slice(&self.details);
        buf
    }

    /// Decodes an error payload.
    ///
    /// Fails only on size violations (total < 8 or msg_len overrunning the
    /// buffer); the message is decoded leniently.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 8 {
            return Err(ProtocolError::MalformedErrorPayload);
        }

        let mut buf = data;
        let code = buf.get_u32();
        let msg_len = buf.get_u32() as usize;

        if buf.remaining() < msg_len {
            return Err(ProtocolError::MalformedErrorPayload);
        }

        let message = String::from_utf8_lossy(&buf[..msg_len]).into_owned();
        buf.advance(msg_len);
        let details = Bytes::copy_from_slice(buf);

        Ok(Self {
            code,
            message,
            details,
        })
    }
}
