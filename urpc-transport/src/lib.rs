//! # urpc-transport
//!
//! Stream transports for uRPC.
//!
//! This crate provides:
//! - [`RpcStream`], one async byte stream over plain TCP or TLS
//! - TLS connector/acceptor construction (server-auth and mutual TLS)
//! - Peer identity extraction from the peer certificate
//! - The AES-256-GCM application cipher keyed from the TLS exporter
//! - [`StreamFactory`], which hides the backend from clients and servers

pub mod config;
pub mod crypto;
pub mod error;
pub mod factory;
pub mod peer;
pub mod stream;
pub mod tls;

pub use config::{TlsClientConfig, TlsServerConfig};
pub use crypto::{AppCipher, CryptoError, APP_KEY_LEN, GCM_IV_LEN, GCM_TAG_LEN};
pub use error::TransportError;
pub use factory::{StreamFactory, TcpStreamFactory, TlsStreamFactory};
pub use peer::PeerIdentity;
pub use stream::{read_exact_or_close, send_frame, RpcStream};

/// Label for the TLS keying-material exporter that derives the 32-byte
/// application key.
pub const APP_KEY_LABEL: &[u8] = b"urpc_app_key_v1";
