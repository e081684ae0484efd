//! # urpc-protocol
//!
//! Wire protocol implementation for uRPC.
//!
//! This crate provides:
//! - The fixed 28-byte big-endian frame header codec
//! - Frame type and flag definitions
//! - 64-bit FNV-1a method identifiers (usable in `const` context)
//! - The binary error-payload codec and protocol error types

pub mod error;
pub mod frame;
pub mod hash;

pub use error::{error_codes, ErrorPayload, ProtocolError};
pub use frame::{FrameFlags, FrameHeader, FrameType, FRAME_HEADER_SIZE, MAGIC};
pub use hash::{fnv1a64, method_id};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for uRPC servers.
pub const DEFAULT_PORT: u16 = 45900;

/// Default policy limit on frame payload size (16 MiB).
///
/// The header's length field is a full u32; this is the default bound
/// readers enforce before allocating.
pub const DEFAULT_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;
