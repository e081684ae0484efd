//! Per-connection reader, dispatcher, and response writers.

use crate::context::{RpcContext, RpcError};
use crate::registry::MethodRegistry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use urpc_protocol::{
    error_codes, ErrorPayload, FrameFlags, FrameHeader, FrameType, FRAME_HEADER_SIZE,
};
use urpc_transport::{read_exact_or_close, send_frame, AppCipher, PeerIdentity, RpcStream};

/// Connection tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Policy limit on payload size; larger frames are framing errors.
    pub max_payload: u32,
    /// Inactivity timeout applied to reads; expiry tears the connection
    /// down like an orderly close.
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_payload: urpc_protocol::DEFAULT_MAX_PAYLOAD,
            idle_timeout: None,
        }
    }
}

/// One accepted connection.
///
/// Owns the transport's write half behind the write mutex and the
/// cancellation map; the read half is driven by [`RpcConnection::run`].
pub struct RpcConnection {
    registry: Arc<MethodRegistry>,
    writer: Mutex<WriteHalf<RpcStream>>,
    cancel_map: Mutex<HashMap<u32, CancellationToken>>,
    cipher: Option<AppCipher>,
    peer: Option<Arc<PeerIdentity>>,
    hint_flags: u16,
    options: ConnectionOptions,
}

impl RpcConnection {
    /// Splits the transport and builds the shared connection state.
    ///
    /// The returned read half must be passed to [`RpcConnection::run`].
    pub fn new(
        stream: RpcStream,
        registry: Arc<MethodRegistry>,
        options: ConnectionOptions,
    ) -> (Arc<Self>, ReadHalf<RpcStream>) {
        let peer = stream.peer_identity();
        let cipher = stream.app_cipher();
        let hint_flags = stream.hint_flags();
        let (read_half, write_half) = tokio::io::split(stream);

        let conn = Arc::new(Self {
            registry,
            writer: Mutex::new(write_half),
            cancel_map: Mutex::new(HashMap::new()),
            cipher,
            peer,
            hint_flags,
            options,
        });

        (conn, read_half)
    }

    /// Reader loop: reads frames until the transport fails or closes, then
    /// shuts the transport down.
    pub async fn run(self: Arc<Self>, mut reader: ReadHalf<RpcStream>) {
        loop {
            let mut head = [0u8; FRAME_HEADER_SIZE];
            if !read_exact_or_close(&mut reader, &mut head, self.options.idle_timeout).await {
                tracing::debug!("header read failed, closing connection");
                break;
            }

            let hdr = match FrameHeader::parse(&head) {
                Ok(hdr) => hdr,
                Err(e) => {
                    tracing::warn!("unparseable header: {}", e);
                    break;
                }
            };

            if let Err(e) = hdr.validate() {
                tracing::warn!("invalid frame header: {}", e);
                break;
            }

            if hdr.length > self.options.max_payload {
                tracing::warn!(
                    "frame payload {} exceeds limit {}",
                    hdr.length,
                    self.options.max_payload
                );
                break;
            }

            let mut payload = vec![0u8; hdr.length as usize];
            if hdr.length > 0
                && !read_exact_or_close(&mut reader, &mut payload, self.options.idle_timeout).await
            {
                tracing::warn!("short payload read (wanted {} bytes)", hdr.length);
                break;
            }

            match hdr.frame_type() {
                Some(FrameType::Request) => {
                    let conn = self.clone();
                    tokio::spawn(async move {
                        conn.handle_request(hdr, Bytes::from(payload)).await;
                    });
                }
                Some(FrameType::Cancel) => self.handle_cancel(hdr).await,
                Some(FrameType::Ping) => self.handle_ping(hdr).await,
                other => {
                    tracing::debug!(
                        "ignoring frame type {:?} (raw {}) sid={}",
                        other,
                        hdr.frame_type,
                        hdr.stream_id
                    );
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_request(self: Arc<Self>, hdr: FrameHeader, payload: Bytes) {
        let Some(handler) = self.registry.find(hdr.method_id) else {
            tracing::debug!("no handler for method_id={:#018x}", hdr.method_id);
            self.send_simple_error(
                hdr.stream_id,
                hdr.method_id,
                error_codes::UNKNOWN_METHOD,
                "Unknown method",
            )
            .await;
            return;
        };

        let token = CancellationToken::new();
        self.cancel_map
            .lock()
            .await
            .insert(hdr.stream_id, token.clone());

        let ctx = RpcContext {
            stream_id: hdr.stream_id,
            method_id: hdr.method_id,
            flags: hdr.flags,
            cancel: token,
            peer: self.peer.clone(),
        };

        let body = if hdr.flags.is_encrypted() {
            match &self.cipher {
                Some(cipher) => match cipher.decrypt(&payload) {
                    Ok(plain) => Bytes::from(plain),
                    Err(e) => {
                        tracing::warn!("request decryption failed sid={}: {}", hdr.stream_id, e);
                        self.cancel_map.lock().await.remove(&hdr.stream_id);
                        self.send_simple_error(
                            hdr.stream_id,
                            hdr.method_id,
                            error_codes::BAD_ENCRYPTED_PAYLOAD,
                            "Invalid encrypted payload",
                        )
                        .await;
                        return;
                    }
                },
                None => {
                    tracing::warn!("encrypted request but no cipher sid={}", hdr.stream_id);
                    self.cancel_map.lock().await.remove(&hdr.stream_id);
                    self.send_simple_error(
                        hdr.stream_id,
                        hdr.method_id,
                        error_codes::BAD_ENCRYPTED_PAYLOAD,
                        "Encrypted payload but cipher not available",
                    )
                    .await;
                    return;
                }
            }
        } else {
            payload
        };

        let result = handler(ctx, body).await;

        self.cancel_map.lock().await.remove(&hdr.stream_id);

        match result {
            Ok(body) => {
                self.send_response(hdr.stream_id, hdr.method_id, &body)
                    .await;
            }
            Err(err) => {
                tracing::debug!(
                    "handler error sid={} code={} msg='{}'",
                    hdr.stream_id,
                    err.code,
                    err.message
                );
                self.send_error(hdr.stream_id, hdr.method_id, err).await;
            }
        }
    }

    async fn handle_cancel(&self, hdr: FrameHeader) {
        let source = self.cancel_map.lock().await.remove(&hdr.stream_id);
        match source {
            Some(token) => {
                tracing::debug!("cancelling sid={}", hdr.stream_id);
                token.cancel();
            }
            None => {
                tracing::debug!("cancel for unknown sid={}", hdr.stream_id);
            }
        }
    }

    async fn handle_ping(&self, hdr: FrameHeader) {
        let pong = FrameHeader::new(
            FrameType::Pong,
            FrameFlags::new().with_end_stream().with_hints(self.hint_flags),
            hdr.stream_id,
            hdr.method_id,
            0,
        );
        self.locked_send(&pong, &[]).await;
    }

    /// Sends a successful Response, encrypting when a cipher is available.
    pub async fn send_response(&self, stream_id: u32, method_id: u64, body: &[u8]) -> bool {
        self.send_payload(stream_id, method_id, body, FrameFlags::new().with_end_stream())
            .await
    }

    /// Sends an error Response with the binary error payload.
    pub async fn send_error(&self, stream_id: u32, method_id: u64, err: RpcError) -> bool {
        let payload: ErrorPayload = err.into();
        self.send_payload(
            stream_id,
            method_id,
            &payload.encode(),
            FrameFlags::new().with_end_stream().with_error(),
        )
        .await
    }

    /// Sends an error Response with a code and message only.
    pub async fn send_simple_error(
        &self,
        stream_id: u32,
        method_id: u64,
        code: u32,
        message: &str,
    ) -> bool {
        self.send_error(stream_id, method_id, RpcError::new(code, message))
            .await
    }

    async fn send_payload(
        &self,
        stream_id: u32,
        method_id: u64,
        body: &[u8],
        mut flags: FrameFlags,
    ) -> bool {
        let encrypted;
        let payload: &[u8] = match &self.cipher {
            Some(cipher) if !body.is_empty() => match cipher.encrypt(body) {
                Ok(ct) => {
                    flags = flags.with_encrypted();
                    encrypted = ct;
                    &encrypted
                }
                Err(e) => {
                    tracing::error!("response encryption failed sid={}: {}", stream_id, e);
                    return false;
                }
            },
            _ => body,
        };

        let hdr = FrameHeader::new(
            FrameType::Response,
            flags,
            stream_id,
            method_id,
            payload.len() as u32,
        );
        self.locked_send(&hdr, payload).await
    }

    async fn locked_send(&self, hdr: &FrameHeader, payload: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        match send_frame(&mut *writer, hdr, payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("frame send failed sid={}: {}", hdr.stream_id, e);
                false
            }
        }
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use urpc_protocol::method_id;

    async fn spawn_connection(registry: MethodRegistry) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(registry);

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = RpcStream::plain(socket);
            let (conn, reader) = RpcConnection::new(stream, registry, ConnectionOptions::default());
            conn.run(reader).await;
        });

        TcpStream::connect(addr).await.unwrap()
    }

    fn echo_registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register_name("Example.Echo", |_ctx, body: Bytes| async move {
            Ok(body.to_vec())
        });
        registry
    }

    async fn write_frame(socket: &mut TcpStream, hdr: &FrameHeader, payload: &[u8]) {
        socket.write_all(&hdr.encode()).await.unwrap();
        if !payload.is_empty() {
            socket.write_all(payload).await.unwrap();
        }
    }

    async fn read_frame(socket: &mut TcpStream) -> (FrameHeader, Vec<u8>) {
        let mut head = [0u8; FRAME_HEADER_SIZE];
        socket.read_exact(&mut head).await.unwrap();
        let hdr = FrameHeader::parse(&head).unwrap();
        let mut payload = vec![0u8; hdr.length as usize];
        if hdr.length > 0 {
            socket.read_exact(&mut payload).await.unwrap();
        }
        (hdr, payload)
    }

    #[tokio::test]
    async fn test_echo_request() {
        let mut socket = spawn_connection(echo_registry()).await;

        let hdr = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new().with_end_stream(),
            5,
            method_id("Example.Echo"),
            5,
        );
        write_frame(&mut socket, &hdr, b"Hello").await;

        let (resp, payload) = read_frame(&mut socket).await;
        assert_eq!(resp.frame_type(), Some(FrameType::Response));
        assert_eq!(resp.stream_id, 5);
        assert_eq!(resp.flags.bits(), 0x0001);
        assert_eq!(payload, b"Hello");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut socket = spawn_connection(MethodRegistry::new()).await;

        let hdr = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new().with_end_stream(),
            2,
            0xdead_beef_dead_beef,
            0,
        );
        write_frame(&mut socket, &hdr, &[]).await;

        let (resp, payload) = read_frame(&mut socket).await;
        assert_eq!(resp.flags.bits(), 0x0003); // END_STREAM|ERROR
        assert_eq!(&payload[0..4], &[0x00, 0x00, 0x01, 0x94]); // 404
        assert_eq!(&payload[4..8], &[0x00, 0x00, 0x00, 0x0e]); // msg_len 14
        assert_eq!(&payload[8..], b"Unknown method");
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let mut socket = spawn_connection(MethodRegistry::new()).await;

        let ping = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream(),
            7,
            0,
            0,
        );
        write_frame(&mut socket, &ping, &[]).await;

        let (pong, payload) = read_frame(&mut socket).await;
        assert_eq!(pong.frame_type(), Some(FrameType::Pong));
        assert_eq!(pong.stream_id, 7);
        assert_eq!(pong.length, 0);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_ping_with_payload_accepted() {
        let mut socket = spawn_connection(MethodRegistry::new()).await;

        let ping = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream(),
            8,
            0,
            4,
        );
        write_frame(&mut socket, &ping, b"junk").await;

        let (pong, _) = read_frame(&mut socket).await;
        assert_eq!(pong.frame_type(), Some(FrameType::Pong));
        assert_eq!(pong.stream_id, 8);
        assert_eq!(pong.length, 0);
    }

    #[tokio::test]
    async fn test_unknown_frame_type_ignored() {
        let mut socket = spawn_connection(echo_registry()).await;

        let mut bogus = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new(),
            1,
            0,
            0,
        );
        bogus.frame_type = 0xEE;
        write_frame(&mut socket, &bogus, &[]).await;

        // Connection survives: a ping still answers.
        let ping = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream(),
            2,
            0,
            0,
        );
        write_frame(&mut socket, &ping, &[]).await;
        let (pong, _) = read_frame(&mut socket).await;
        assert_eq!(pong.stream_id, 2);
    }

    #[tokio::test]
    async fn test_cancel_unknown_stream_is_noop() {
        let mut socket = spawn_connection(MethodRegistry::new()).await;

        let cancel = FrameHeader::new(
            FrameType::Cancel,
            FrameFlags::new(),
            99,
            0,
            0,
        );
        write_frame(&mut socket, &cancel, &[]).await;

        let ping = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream(),
            3,
            0,
            0,
        );
        write_frame(&mut socket, &ping, &[]).await;
        let (pong, _) = read_frame(&mut socket).await;
        assert_eq!(pong.stream_id, 3);
    }

    #[tokio::test]
    async fn test_cancel_signals_handler() {
        let mut registry = MethodRegistry::new();
        registry.register_name("Example.Wait", |ctx: RpcContext, _body| async move {
            ctx.cancel.cancelled().await;
            Err(RpcError::new(499, "cancelled"))
        });
        let mut socket = spawn_connection(registry).await;

        let req = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new().with_end_stream(),
            9,
            method_id("Example.Wait"),
            0,
        );
        write_frame(&mut socket, &req, &[]).await;

        // Give dispatch a moment, then cancel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let cancel = FrameHeader::new(FrameType::Cancel, FrameFlags::new(), 9, 0, 0);
        write_frame(&mut socket, &cancel, &[]).await;

        let (resp, payload) = tokio::time::timeout(
            Duration::from_millis(100),
            read_frame(&mut socket),
        )
        .await
        .expect("handler must observe cancellation within 100ms");

        assert_eq!(resp.stream_id, 9);
        assert!(resp.flags.is_error());
        let err = ErrorPayload::decode(&payload).unwrap();
        assert_eq!(err.code, 499);
    }

    #[tokio::test]
    async fn test_bad_magic_disconnects() {
        let mut socket = spawn_connection(MethodRegistry::new()).await;

        let mut head = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new(),
            1,
            0,
            0,
        )
        .encode();
        head[0] = b'X';
        socket.write_all(&head).await.unwrap();

        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0); // server closed
    }

    #[tokio::test]
    async fn test_oversized_payload_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let stream = RpcStream::plain(socket);
            let options = ConnectionOptions {
                max_payload: 16,
                idle_timeout: None,
            };
            let (conn, reader) =
                RpcConnection::new(stream, Arc::new(MethodRegistry::new()), options);
            conn.run(reader).await;
        });

        let mut socket = TcpStream::connect(addr).await.unwrap();
        let hdr = FrameHeader::new(
            FrameType::Request,
            FrameFlags::new().with_end_stream(),
            1,
            0,
            17,
        );
        socket.write_all(&hdr.encode()).await.unwrap();

        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_one_response_each() {
        let mut registry = MethodRegistry::new();
        registry.register_name("Example.Echo", |_ctx, body: Bytes| async move {
            Ok(body.to_vec())
        });
        let mut socket = spawn_connection(registry).await;

        for sid in 1..=3u32 {
            let hdr = FrameHeader::new(
                FrameType::Request,
                FrameFlags::new().with_end_stream(),
                sid,
                method_id("Example.Echo"),
                1,
            );
            write_frame(&mut socket, &hdr, &[sid as u8]).await;
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let (resp, payload) = read_frame(&mut socket).await;
            assert_eq!(payload, vec![resp.stream_id as u8]);
            assert!(seen.insert(resp.stream_id));
        }
        assert_eq!(seen.len(), 3);
    }
}
