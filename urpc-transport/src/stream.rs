//! The uRPC byte-stream transport.
//!
//! [`RpcStream`] wraps either a plain TCP socket or a TLS session and
//! carries the connection-scoped peer identity and application cipher.
//! Connections split it into read/write halves with `tokio::io::split`.

use crate::crypto::AppCipher;
use crate::peer::PeerIdentity;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use urpc_protocol::{FrameFlags, FrameHeader};

pin_project! {
    /// The underlying byte stream.
    #[project = StreamIoProj]
    enum StreamIo {
        Plain { #[pin] stream: TcpStream },
        TlsClient { #[pin] stream: tokio_rustls::client::TlsStream<TcpStream> },
        TlsServer { #[pin] stream: tokio_rustls::server::TlsStream<TcpStream> },
    }
}

pin_project! {
    /// A connected uRPC transport.
    ///
    /// Exposes the capability set of the protocol's transport boundary:
    /// async read/write/shutdown plus the optional peer identity and the
    /// optional exporter-derived application cipher.
    pub struct RpcStream {
        #[pin]
        io: StreamIo,
        peer: Option<Arc<PeerIdentity>>,
        cipher: Option<AppCipher>,
    }
}

impl RpcStream {
    /// Wraps a plain TCP socket. No peer identity, no application cipher.
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            io: StreamIo::Plain { stream },
            peer: None,
            cipher: None,
        }
    }

    pub(crate) fn tls_client(
        stream: tokio_rustls::client::TlsStream<TcpStream>,
        peer: Option<PeerIdentity>,
        cipher: Option<AppCipher>,
    ) -> Self {
        Self {
            io: StreamIo::TlsClient { stream },
            peer: peer.map(Arc::new),
            cipher,
        }
    }

    pub(crate) fn tls_server(
        stream: tokio_rustls::server::TlsStream<TcpStream>,
        peer: Option<PeerIdentity>,
        cipher: Option<AppCipher>,
    ) -> Self {
        Self {
            io: StreamIo::TlsServer { stream },
            peer: peer.map(Arc::new),
            cipher,
        }
    }

    /// Returns whether this stream runs over TLS.
    pub fn is_tls(&self) -> bool {
        !matches!(self.io, StreamIo::Plain { .. })
    }

    /// Identity of an authenticated peer, if the handshake produced one.
    pub fn peer_identity(&self) -> Option<Arc<PeerIdentity>> {
        match &self.peer {
            Some(peer) if peer.authenticated => Some(peer.clone()),
            _ => None,
        }
    }

    /// The application cipher derived from the TLS exporter, if configured.
    pub fn app_cipher(&self) -> Option<AppCipher> {
        self.cipher.clone()
    }

    /// TLS/MTLS hint bits for outbound frame flags.
    pub fn hint_flags(&self) -> u16 {
        let mut bits = 0;
        if self.is_tls() {
            bits |= FrameFlags::TLS;
        }
        if self.peer_identity().is_some() {
            bits |= FrameFlags::MTLS;
        }
        bits
    }

    /// Terminates the transport. Idempotent; errors on repeat are ignored.
    pub async fn shutdown(&mut self) {
        let _ = AsyncWriteExt::shutdown(self).await;
    }
}

impl AsyncRead for RpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project().io.project() {
            StreamIoProj::Plain { stream } => stream.poll_read(cx, buf),
            StreamIoProj::TlsClient { stream } => stream.poll_read(cx, buf),
            StreamIoProj::TlsServer { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project().io.project() {
            StreamIoProj::Plain { stream } => stream.poll_write(cx, buf),
            StreamIoProj::TlsClient { stream } => stream.poll_write(cx, buf),
            StreamIoProj::TlsServer { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().io.project() {
            StreamIoProj::Plain { stream } => stream.poll_flush(cx),
            StreamIoProj::TlsClient { stream } => stream.poll_flush(cx),
            StreamIoProj::TlsServer { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project().io.project() {
            StreamIoProj::Plain { stream } => stream.poll_shutdown(cx),
            StreamIoProj::TlsClient { stream } => stream.poll_shutdown(cx),
            StreamIoProj::TlsServer { stream } => stream.poll_shutdown(cx),
        }
    }
}

/// Serializes `header` and writes it followed by `payload`, then flushes.
///
/// Callers must hold the connection's write lock so header and payload are
/// never interleaved with other frames.
pub async fn send_frame<W>(writer: &mut W, header: &FrameHeader, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await
}

/// Reads exactly `buf.len()` bytes, treating EOF, errors, and an expired
/// inactivity timeout all as end-of-stream.
///
/// Returns `true` only when the buffer was filled completely.
pub async fn read_exact_or_close<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> bool
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let read = async {
        match reader.read_exact(buf).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("read_exact failed: {}", e);
                false
            }
        }
    };

    match idle_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, read).await {
            Ok(ok) => ok,
            Err(_) => {
                tracing::debug!("read timed out after {:?}", timeout);
                false
            }
        },
        None => read.await,
    }
}
