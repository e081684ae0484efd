//! Request context and handler error type.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use urpc_protocol::{ErrorPayload, FrameFlags};
use urpc_transport::PeerIdentity;

/// Per-request context handed to method handlers.
///
/// Handlers reply through their return value; the connection owns the
/// frame writers.
#[derive(Debug, Clone)]
pub struct RpcContext {
    /// Stream id of the request frame, echoed on the response.
    pub stream_id: u32,
    /// Method id of the request frame.
    pub method_id: u64,
    /// Flags of the request frame.
    pub flags: FrameFlags,
    /// Signaled when the client sends a Cancel for this stream id.
    /// Observation is cooperative; the handler decides when to return.
    pub cancel: CancellationToken,
    /// Authenticated peer identity, for TLS transports that verified one.
    pub peer: Option<Arc<PeerIdentity>>,
}

/// Application error produced by a handler.
///
/// Sent to the client as a Response with `END_STREAM|ERROR` and the binary
/// error payload.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: u32,
    pub message: String,
    pub details: Bytes,
}

impl RpcError {
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
}

impl From<RpcError> for ErrorPayload {
    fn from(err: RpcError) -> Self {
        ErrorPayload {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// What a handler returns: response bytes or an application error.
pub type HandlerResult = Result<Vec<u8>, RpcError>;
