//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] urpc_transport::TransportError),

    #[error("payload encryption error: {0}")]
    Crypto(#[from] urpc_transport::CryptoError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("call failed: {code} - {message}")]
    Call { code: u32, message: String },
}
