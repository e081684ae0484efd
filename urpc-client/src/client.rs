//! The uRPC client.
//!
//! One client owns at most one connected transport, a reader task that
//! correlates Response frames to pending calls by stream id, and an
//! optional liveness task that pings the server periodically.

use crate::config::RpcClientConfig;
use crate::error::ClientError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use urpc_protocol::{
    fnv1a64, ErrorPayload, FrameFlags, FrameHeader, FrameType, FRAME_HEADER_SIZE,
};
use urpc_transport::{read_exact_or_close, send_frame, AppCipher, RpcStream, StreamFactory};

/// Outcome delivered by the reader to a pending call.
enum CallOutcome {
    Success(Bytes),
    Error { code: u32, message: String },
    Closed,
}

struct ClientInner {
    config: RpcClientConfig,
    running: AtomicBool,
    next_stream_id: AtomicU32,
    hint_flags: AtomicU16,
    /// Serializes reconnect attempts; at most one reader task per transport.
    connect_mutex: Mutex<()>,
    writer: Mutex<Option<WriteHalf<RpcStream>>>,
    reader: Mutex<Option<ReadHalf<RpcStream>>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<CallOutcome>>>,
    ping_waiters: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    cipher: RwLock<Option<AppCipher>>,
    liveness_active: AtomicBool,
}

/// A uRPC client.
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                running: AtomicBool::new(false),
                next_stream_id: AtomicU32::new(1),
                hint_flags: AtomicU16::new(0),
                connect_mutex: Mutex::new(()),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                ping_waiters: Mutex::new(HashMap::new()),
                cipher: RwLock::new(None),
                liveness_active: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the client currently holds a live transport.
    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Issues a call by method id and awaits the response.
    pub async fn call(&self, method_id: u64, body: &[u8]) -> Result<Bytes, ClientError> {
        self.inner.ensure_connected().await?;

        let sid = self.inner.alloc_stream_id();
        tracing::debug!(
            "call method_id={:#018x} sid={} body_len={}",
            method_id,
            sid,
            body.len()
        );

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(sid, tx);

        let send_result: Result<(), ClientError> = {
            let mut writer_guard = self.inner.writer.lock().await;

            // Encrypt under the write lock so ciphertext order matches
            // frame order on the wire.
            let cipher = self.inner.cipher.read().clone();
            let sealed: Result<Option<Vec<u8>>, ClientError> = match cipher {
                Some(cipher) if !body.is_empty() => match cipher.encrypt(body) {
                    Ok(ct) => Ok(Some(ct)),
                    Err(e) => Err(e.into()),
                },
                _ => Ok(None),
            };

            match sealed {
                Err(e) => Err(e),
                Ok(sealed) => {
                    let mut flags = FrameFlags::new().with_end_stream();
                    if sealed.is_some() {
                        flags = flags.with_encrypted();
                    }
                    let payload: &[u8] = sealed.as_deref().unwrap_or(body);

                    match writer_guard.as_mut() {
                        Some(writer) => {
                            let hdr = FrameHeader::new(
                                FrameType::Request,
                                flags,
                                sid,
                                method_id,
                                payload.len() as u32,
                            );
                            send_frame(writer, &hdr, payload)
                                .await
                                .map_err(ClientError::from)
                        }
                        None => Err(ClientError::NotConnected),
                    }
                }
            }
        };

        if let Err(e) = send_result {
            tracing::debug!("request send failed sid={}: {}", sid, e);
            self.inner.pending.lock().await.remove(&sid);
            return Err(e);
        }

        match rx.await {
            Ok(CallOutcome::Success(bytes)) => Ok(bytes),
            Ok(CallOutcome::Error { code, message }) => Err(ClientError::Call { code, message }),
            Ok(CallOutcome::Closed) | Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Issues a call by method name, hashing it at call time.
    pub async fn call_named(&self, name: &str, body: &[u8]) -> Result<Bytes, ClientError> {
        self.call(fnv1a64(name.as_bytes()), body).await
    }

    /// Pings the server. Returns true only when a Pong actually arrived.
    pub async fn ping(&self) -> bool {
        if self.inner.ensure_connected().await.is_err() {
            return false;
        }

        let sid = self.inner.alloc_stream_id();
        let (tx, rx) = oneshot::channel();
        self.inner.ping_waiters.lock().await.insert(sid, tx);

        let hints = self.inner.hint_flags.load(Ordering::Relaxed);
        let hdr = FrameHeader::new(
            FrameType::Ping,
            FrameFlags::new().with_end_stream().with_hints(hints),
            sid,
            0,
            0,
        );

        let sent = {
            let mut writer_guard = self.inner.writer.lock().await;
            match writer_guard.as_mut() {
                Some(writer) => send_frame(writer, &hdr, &[]).await.is_ok(),
                None => false,
            }
        };

        if !sent {
            self.inner.ping_waiters.lock().await.remove(&sid);
            return false;
        }

        // The waiter is consumed only by a real Pong; the termination sweep
        // drops it and the receiver observes closure.
        rx.await.is_ok()
    }

    /// Requests cooperative cancellation of an in-flight call.
    ///
    /// The pending call remains awaited; the server still answers the
    /// stream id with a Response.
    pub async fn cancel(&self, stream_id: u32) -> Result<(), ClientError> {
        let hdr = FrameHeader::new(FrameType::Cancel, FrameFlags::new(), stream_id, 0, 0);
        let mut writer_guard = self.inner.writer.lock().await;
        match writer_guard.as_mut() {
            Some(writer) => Ok(send_frame(writer, &hdr, &[]).await?),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Tears the connection down. Repeated close is a no-op.
    pub async fn close(&self) {
        tracing::debug!("closing client");
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.inner.reader.lock().await.take();
    }
}

impl ClientInner {
    /// Connects if needed. Re-entrant and race-free via the connect mutex.
    async fn ensure_connected(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.running.load(Ordering::SeqCst) && self.writer.lock().await.is_some() {
            return Ok(());
        }

        let _guard = self.connect_mutex.lock().await;
        if self.running.load(Ordering::SeqCst) && self.writer.lock().await.is_some() {
            return Ok(());
        }

        // Clear any stale transport halves from a previous connection.
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;

        tracing::debug!("connecting to {}:{}", self.config.host, self.config.port);

        let mut factory = self.config.factory.clone().unwrap_or_else(StreamFactory::tcp);
        if self.config.socket_timeout_ms > 0 {
            factory = factory
                .with_connect_timeout(Duration::from_millis(self.config.socket_timeout_ms));
        }

        let stream = factory
            .create_client(&self.config.host, self.config.port)
            .await?;

        *self.cipher.write() = stream.app_cipher();
        self.hint_flags.store(stream.hint_flags(), Ordering::Relaxed);

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.running.store(true, Ordering::SeqCst);

        let inner = self.clone();
        tokio::spawn(async move {
            inner.reader_loop().await;
        });

        if self.config.ping_interval_ms > 0 {
            self.spawn_liveness();
        }

        tracing::debug!("connected");
        Ok(())
    }

    fn alloc_stream_id(&self) -> u32 {
        let sid = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        if sid == 0 {
            return self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        }
        sid
    }

    /// Reader loop: one per connected transport.
    async fn reader_loop(self: Arc<Self>) {
        tracing::debug!("reader loop started");
        let idle_timeout = match self.config.socket_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        while self.running.load(Ordering::SeqCst) {
            let frame = {
                let mut reader_guard = self.reader.lock().await;
                let Some(reader) = reader_guard.as_mut() else {
                    break;
                };

                let mut head = [0u8; FRAME_HEADER_SIZE];
                if !read_exact_or_close(reader, &mut head, idle_timeout).await {
                    break;
                }

                let hdr = match FrameHeader::parse(&head) {
                    Ok(hdr) => hdr,
                    Err(_) => break,
                };
                if let Err(e) = hdr.validate() {
                    tracing::warn!("invalid frame header: {}", e);
                    break;
                }
                if hdr.length > urpc_protocol::DEFAULT_MAX_PAYLOAD {
                    tracing::warn!("frame payload {} exceeds limit", hdr.length);
                    break;
                }

                let mut payload = vec![0u8; hdr.length as usize];
                if hdr.length > 0 && !read_exact_or_close(reader, &mut payload, idle_timeout).await
                {
                    tracing::warn!("short payload read (wanted {} bytes)", hdr.length);
                    break;
                }

                (hdr, payload)
            };
            let (hdr, payload) = frame;

            match hdr.frame_type() {
                Some(FrameType::Response) => {
                    if !self.dispatch_response(hdr, payload).await {
                        break;
                    }
                }
                Some(FrameType::Ping) => {
                    let hints = self.hint_flags.load(Ordering::Relaxed);
                    let pong = FrameHeader::new(
                        FrameType::Pong,
                        FrameFlags::new().with_end_stream().with_hints(hints),
                        hdr.stream_id,
                        hdr.method_id,
                        0,
                    );
                    let mut writer_guard = self.writer.lock().await;
                    if let Some(writer) = writer_guard.as_mut() {
                        let _ = send_frame(writer, &pong, &[]).await;
                    }
                }
                Some(FrameType::Pong) => {
                    if let Some(waiter) = self.ping_waiters.lock().await.remove(&hdr.stream_id) {
                        let _ = waiter.send(());
                    } else {
                        tracing::debug!("pong for unknown sid={}", hdr.stream_id);
                    }
                }
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

        tracing::debug!("reader loop exiting");
        self.running.store(false, Ordering::SeqCst);

        // Fail every outstanding call and ping waiter.
        {
            let mut pending = self.pending.lock().await;
            for (sid, tx) in pending.drain() {
                tracing::debug!("failing pending call sid={}", sid);
                let _ = tx.send(CallOutcome::Closed);
            }
        }
        {
            let mut waiters = self.ping_waiters.lock().await;
            waiters.clear();
        }

        // Reset the transport under the connect mutex, unless a reconnect
        // already installed a fresh one.
        let _guard = self.connect_mutex.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
            let _ = self.reader.lock().await.take();
        }
    }

    /// Delivers a Response to its pending call.
    ///
    /// Returns false when the stream id is unknown, which is a protocol
    /// violation that terminates the reader loop.
    async fn dispatch_response(&self, hdr: FrameHeader, payload: Vec<u8>) -> bool {
        let Some(tx) = self.pending.lock().await.remove(&hdr.stream_id) else {
            tracing::warn!("response for unknown sid={}", hdr.stream_id);
            return false;
        };

        let payload = if hdr.flags.is_encrypted() {
            let cipher = self.cipher.read().clone();
            match cipher {
                Some(cipher) => match cipher.decrypt(&payload) {
                    Ok(plain) => plain,
                    Err(e) => {
                        let _ = tx.send(CallOutcome::Error {
                            code: 0,
                            message: format!("Response decryption failed: {}", e),
                        });
                        return true;
                    }
                },
                None => {
                    let _ = tx.send(CallOutcome::Error {
                        code: 0,
                        message: "Encrypted response but cipher not available".to_string(),
                    });
                    return true;
                }
            }
        } else {
            payload
        };

        let outcome = if hdr.flags.is_error() {
            match ErrorPayload::decode(&payload) {
                Ok(err) => CallOutcome::Error {
                    code: err.code,
                    message: err.message,
                },
                Err(_) => CallOutcome::Error {
                    code: 0,
                    message: "Malformed error payload".to_string(),
                },
            }
        } else {
            CallOutcome::Success(Bytes::from(payload))
        };

        let _ = tx.send(outcome);
        true
    }

    /// Spawns the periodic liveness task, at most one per client.
    fn spawn_liveness(self: &Arc<Self>) {
        if self.liveness_active.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak: Weak<ClientInner> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.ping_interval_ms);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.running.load(Ordering::SeqCst) {
                    inner.liveness_active.store(false, Ordering::SeqCst);
                    break;
                }

                let client = RpcClient { inner };
                if !client.ping().await {
                    tracing::warn!("liveness ping failed, closing client");
                    client.close().await;
                    client.inner.liveness_active.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
    }
}
