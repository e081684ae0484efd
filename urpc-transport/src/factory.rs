//! Stream factory: produces client and server transports while hiding
//! which backend is in use.

use crate::config::{TlsClientConfig, TlsServerConfig};
use crate::crypto::AppCipher;
use crate::error::TransportError;
use crate::stream::RpcStream;
use crate::tls::{
    create_tls_acceptor, create_tls_connector, exporter_app_key, peer_identity_from_certs,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

/// Produces transports symmetrically for clients (`create_client`) and
/// servers (`create_server`).
#[derive(Debug, Clone)]
pub enum StreamFactory {
    Tcp(TcpStreamFactory),
    Tls(TlsStreamFactory),
}

impl StreamFactory {
    /// Plain TCP factory with no connect timeout.
    pub fn tcp() -> Self {
        Self::Tcp(TcpStreamFactory::default())
    }

    /// Plain TCP factory with the given connect timeout.
    pub fn tcp_with_timeout(timeout: Duration) -> Self {
        Self::Tcp(TcpStreamFactory {
            connect_timeout: Some(timeout),
        })
    }

    /// TLS factory for the client side.
    pub fn tls_client(config: TlsClientConfig) -> Self {
        Self::Tls(TlsStreamFactory {
            client_cfg: config,
            server_cfg: TlsServerConfig::default(),
            acceptor: None,
            connect_timeout: None,
        })
    }

    /// TLS factory for the server side. Loads certificates eagerly so
    /// configuration errors surface before the accept loop starts.
    pub fn tls_server(config: TlsServerConfig) -> Result<Self, TransportError> {
        let acceptor = if config.enabled {
            Some(create_tls_acceptor(&config)?)
        } else {
            None
        };
        Ok(Self::Tls(TlsStreamFactory {
            client_cfg: TlsClientConfig::default(),
            server_cfg: config,
            acceptor,
            connect_timeout: None,
        }))
    }

    /// Sets the connect timeout for `create_client`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        match &mut self {
            Self::Tcp(f) => f.connect_timeout = Some(timeout),
            Self::Tls(f) => f.connect_timeout = Some(timeout),
        }
        self
    }

    /// Connects to `host:port` and produces a client-side transport.
    pub async fn create_client(&self, host: &str, port: u16) -> Result<RpcStream, TransportError> {
        match self {
            Self::Tcp(f) => {
                let socket = connect_tcp(host, port, f.connect_timeout).await?;
                Ok(RpcStream::plain(socket))
            }
            Self::Tls(f) => {
                let socket = connect_tcp(host, port, f.connect_timeout).await?;
                if !f.client_cfg.enabled {
                    return Ok(RpcStream::plain(socket));
                }
                f.handshake_client(socket, host).await
            }
        }
    }

    /// Wraps an accepted socket into a server-side transport.
    pub async fn create_server(&self, socket: TcpStream) -> Result<RpcStream, TransportError> {
        match self {
            Self::Tcp(_) => Ok(RpcStream::plain(socket)),
            Self::Tls(f) => match &f.acceptor {
                Some(acceptor) => f.handshake_server(acceptor, socket).await,
                None => Ok(RpcStream::plain(socket)),
            },
        }
    }
}

/// Plain TCP backend.
#[derive(Debug, Clone, Default)]
pub struct TcpStreamFactory {
    /// Optional connect timeout.
    pub connect_timeout: Option<Duration>,
}

/// TLS backend; holds both side configurations so one factory can serve a
/// process acting as client, server, or both.
#[derive(Clone)]
pub struct TlsStreamFactory {
    client_cfg: TlsClientConfig,
    server_cfg: TlsServerConfig,
    acceptor: Option<TlsAcceptor>,
    connect_timeout: Option<Duration>,
}

impl std::fmt::Debug for TlsStreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStreamFactory")
            .field("client_cfg", &self.client_cfg)
            .field("server_cfg", &self.server_cfg)
            .field("acceptor", &self.acceptor.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TlsStreamFactory {
    async fn handshake_client(
        &self,
        socket: TcpStream,
        host: &str,
    ) -> Result<RpcStream, TransportError> {
        let (connector, server_name) = create_tls_connector(&self.client_cfg, host)?;

        tracing::debug!("performing TLS handshake with {}", host);
        let stream = connector
            .connect(server_name, socket)
            .await
            .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS handshake complete");

        let (peer, cipher) = {
            let (_, conn) = stream.get_ref();
            let authenticated = self.client_cfg.verify_peer && conn.peer_certificates().is_some();
            let peer = peer_identity_from_certs(conn.peer_certificates(), authenticated);
            let cipher = if self.client_cfg.app_encryption {
                exporter_app_key(conn).map(|key| AppCipher::new(&key))
            } else {
                None
            };
            (peer, cipher)
        };

        Ok(RpcStream::tls_client(stream, peer, cipher))
    }

    async fn handshake_server(
        &self,
        acceptor: &TlsAcceptor,
        socket: TcpStream,
    ) -> Result<RpcStream, TransportError> {
        tracing::debug!("performing TLS handshake on accepted socket");
        let stream = acceptor
            .accept(socket)
            .await
            .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS handshake complete");

        let (peer, cipher) = {
            let (_, conn) = stream.get_ref();
            let authenticated =
                self.server_cfg.require_client_cert && conn.peer_certificates().is_some();
            let peer = peer_identity_from_certs(conn.peer_certificates(), authenticated);
            let cipher = if self.server_cfg.app_encryption {
                exporter_app_key(conn).map(|key| AppCipher::new(&key))
            } else {
                None
            };
            (peer, cipher)
        };

        Ok(RpcStream::tls_server(stream, peer, cipher))
    }
}

async fn connect_tcp(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream, TransportError> {
    let connect = TcpStream::connect((host, port));

    let socket = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout)??,
        None => connect.await?,
    };

    socket.set_nodelay(true).ok();
    Ok(socket)
}
