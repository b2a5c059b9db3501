//! Public client API and the connection protocol engine.
//!
//! A `CacheClient` owns one connection to the coordinator. Three tasks run
//! per connection: a writer draining an outbound queue, a reader routing
//! responses to their waiting callers by correlation id and answering
//! server-initiated INVALIDATE fan-out, and a heartbeat ticker. The reader
//! evicts locally and acks fan-out without touching the request path, so
//! eviction can never deadlock against an in-flight put/get/invalidate.
//!
//! Reconnection is explicit: when the connection drops, the local cache is
//! cleared (no invalidations can reach us anymore, so nothing local can be
//! trusted), in-flight calls fail, and subsequent calls fail with
//! `NotConnected` until `start()` is called again.

use crate::client::local_cache::{CachedEntry, LocalCache};
use crate::core::config::ClientConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::core::time::{now_millis, Expiry};
use crate::net::frame::{read_frame, write_frame};
use crate::net::locator::ServerLocator;
use crate::net::tls::build_client_config;
use crate::net::transport::{self, AsyncStream};
use crate::proto::codec::{decode_envelope, encode_envelope};
use crate::proto::message::{Envelope, Message};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Frames queued toward the writer task.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// A near-cache client bound to one coordinator.
pub struct CacheClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    client_id: String,
    shared_secret: String,
    locator: Box<dyn ServerLocator>,
    config: ClientConfig,
    trust_store_file: Option<PathBuf>,
    local: LocalCache,
    conn: Mutex<Option<ConnectionHandle>>,
    /// Correlation id -> waker for the caller blocked on that request.
    pending: Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    correlation: AtomicU64,
    generation: AtomicU64,
    connected_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

struct ConnectionHandle {
    generation: u64,
    outbound: mpsc::Sender<Envelope>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl ClientInner {
    fn next_correlation(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fail every in-flight request by dropping its waker.
    fn fail_pending(&self) {
        self.pending.lock().clear();
    }
}

impl CacheClient {
    /// Create a client with default tunables.
    pub fn new(
        client_id: impl Into<String>,
        shared_secret: impl Into<String>,
        locator: Box<dyn ServerLocator>,
    ) -> Self {
        Self::with_config(client_id, shared_secret, locator, ClientConfig::default(), None)
    }

    /// Create a client with explicit tunables and an optional CA bundle to
    /// verify the server certificate against.
    pub fn with_config(
        client_id: impl Into<String>,
        shared_secret: impl Into<String>,
        locator: Box<dyn ServerLocator>,
        config: ClientConfig,
        trust_store_file: Option<PathBuf>,
    ) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                client_id: client_id.into(),
                shared_secret: shared_secret.into(),
                locator,
                config,
                trust_store_file,
                local: LocalCache::default(),
                conn: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                correlation: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                connected_tx,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Identity this client registers under.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Whether a registered connection is currently up.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Resolve the server, connect, register, and spawn the protocol
    /// engine. A no-op when already connected; an error after `close()`.
    pub async fn start(&self) -> CacheResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(CacheError::NotConnected);
        }
        if inner.conn.lock().is_some() {
            return Ok(());
        }

        let addr = inner.locator.resolve()?;
        let tls = if addr.ssl {
            Some(build_client_config(inner.trust_store_file.as_deref())?)
        } else {
            None
        };
        let connect_timeout = inner.config.connect_timeout();
        let mut stream = transport::connect(&addr, tls, connect_timeout).await?;

        // Register on the undivided stream before the engine takes over.
        let register = Envelope::new(
            inner.next_correlation(),
            Message::Register {
                client_id: inner.client_id.clone(),
                shared_secret: inner.shared_secret.clone(),
            },
        );
        let mut buf = BytesMut::new();
        encode_envelope(&register, &mut buf);
        write_frame(&mut stream, &buf).await?;

        let frame = timeout(
            connect_timeout,
            read_frame(&mut stream, inner.config.max_frame_bytes),
        )
        .await
        .map_err(|_| CacheError::Timeout(connect_timeout))??
        .ok_or_else(|| {
            CacheError::Disconnected("server closed the connection during registration".to_string())
        })?;
        let mut payload = frame;
        let reply = decode_envelope(&mut payload)?;
        match reply.message {
            Message::RegisterAck { accepted: true, .. } => {}
            Message::RegisterAck {
                accepted: false,
                reason,
            } => return Err(CacheError::Authentication(reason)),
            other => {
                return Err(CacheError::Protocol(format!(
                    "expected REGISTER_ACK, got {:?}",
                    other.kind()
                )))
            }
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE_DEPTH);
        let (read_half, write_half) = tokio::io::split(stream);

        let writer = tokio::spawn(writer_loop(write_half, outbound_rx));
        let reader = tokio::spawn(reader_loop(
            self.inner.clone(),
            generation,
            read_half,
            outbound_tx.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.inner.clone(),
            outbound_tx.clone(),
            inner.config.heartbeat_interval(),
        ));

        *inner.conn.lock() = Some(ConnectionHandle {
            generation,
            outbound: outbound_tx,
            reader,
            writer,
            heartbeat,
        });
        inner.connected_tx.send_replace(true);
        tracing::info!(
            client = %inner.client_id,
            server = %addr.dial_addr(),
            ssl = addr.ssl,
            "registered with cache server"
        );
        Ok(())
    }

    /// Block until the client is connected and registered, or the timeout
    /// elapses. Returns whether the connection is up.
    pub async fn wait_for_connection(&self, wait: Duration) -> bool {
        let mut rx = self.inner.connected_tx.subscribe();
        if *rx.borrow() {
            return true;
        }
        timeout(wait, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Write a value. Returns the version the server assigned.
    ///
    /// Success means the invalidation barrier completed: no other client
    /// still serves an older value for this key.
    pub async fn put(&self, key: &str, value: Bytes, expiry: Expiry) -> CacheResult<u64> {
        let epoch = self.inner.local.epoch();
        let reply = self
            .request(Message::Put {
                key: key.to_string(),
                value: value.clone(),
                expiry,
            })
            .await?;
        match reply.message {
            Message::PutAck { version, .. } => {
                self.inner.local.insert(epoch, key, value, expiry, version);
                Ok(version)
            }
            other => Err(CacheError::Protocol(format!(
                "expected PUT_ACK, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Read a value: from the local cache when fresh, otherwise from the
    /// server (which records this client as a holder). `None` means the
    /// key is absent or expired.
    pub async fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>> {
        if !self.is_connected() {
            return Err(CacheError::NotConnected);
        }
        if let Some(entry) = self.inner.local.get_fresh(key, now_millis()) {
            return Ok(Some(entry));
        }
        let epoch = self.inner.local.epoch();
        let reply = self
            .request(Message::Get {
                key: key.to_string(),
            })
            .await?;
        match reply.message {
            Message::GetResult {
                value: Some(value),
                version,
                expiry,
                ..
            } => {
                self.inner
                    .local
                    .insert(epoch, key, value.clone(), expiry, version);
                Ok(Some(CachedEntry {
                    value,
                    version,
                    expiry,
                }))
            }
            Message::GetResult { value: None, .. } => Ok(None),
            other => Err(CacheError::Protocol(format!(
                "expected GET_RESULT, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Remove a key everywhere. Success means every holder evicted.
    pub async fn invalidate(&self, key: &str) -> CacheResult<()> {
        let reply = self
            .request(Message::Invalidate {
                key: key.to_string(),
                origin_client_id: self.inner.client_id.clone(),
            })
            .await?;
        match reply.message {
            Message::InvalidateAck { .. } => {
                self.inner.local.invalidate(key);
                Ok(())
            }
            other => Err(CacheError::Protocol(format!(
                "expected INVALIDATE_ACK, got {:?}",
                other.kind()
            ))),
        }
    }

    /// Tear the connection down. Idempotent; subsequent operations fail
    /// with `NotConnected`.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = inner.conn.lock().take();
        if let Some(handle) = handle {
            // Best-effort goodbye; the writer flushes it and shuts the
            // socket down once the last queue sender is dropped.
            let _ = handle.outbound.try_send(Envelope::new(
                inner.next_correlation(),
                Message::Unregister {
                    client_id: inner.client_id.clone(),
                },
            ));
            handle.heartbeat.abort();
            handle.reader.abort();
            drop(handle.outbound);
        }
        inner.connected_tx.send_replace(false);
        inner.fail_pending();
        inner.local.clear();
        tracing::info!(client = %inner.client_id, "cache client closed");
    }

    /// One request/response round trip with the RPC timeout.
    async fn request(&self, message: Message) -> CacheResult<Envelope> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(CacheError::NotConnected);
        }
        let outbound = {
            let conn = inner.conn.lock();
            conn.as_ref()
                .ok_or(CacheError::NotConnected)?
                .outbound
                .clone()
        };

        let correlation_id = inner.next_correlation();
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(correlation_id, tx);

        let envelope = Envelope::new(correlation_id, message);
        if outbound.send(envelope).await.is_err() {
            inner.pending.lock().remove(&correlation_id);
            return Err(CacheError::NotConnected);
        }

        let rpc_timeout = inner.config.rpc_timeout();
        match timeout(rpc_timeout, rx).await {
            Err(_) => {
                inner.pending.lock().remove(&correlation_id);
                Err(CacheError::Timeout(rpc_timeout))
            }
            Ok(Err(_)) => Err(CacheError::Disconnected(
                "connection lost while waiting for reply".to_string(),
            )),
            Ok(Ok(reply)) => match reply.message {
                Message::Error { code, message } => Err(CacheError::Server {
                    code: code as u16,
                    message,
                }),
                _ => Ok(reply),
            },
        }
    }
}

async fn writer_loop(
    mut write_half: WriteHalf<Box<dyn AsyncStream>>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
) {
    let mut buf = BytesMut::new();
    while let Some(envelope) = outbound_rx.recv().await {
        buf.clear();
        encode_envelope(&envelope, &mut buf);
        if write_frame(&mut write_half, &buf).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn reader_loop(
    inner: Arc<ClientInner>,
    generation: u64,
    mut read_half: ReadHalf<Box<dyn AsyncStream>>,
    outbound: mpsc::Sender<Envelope>,
) {
    loop {
        let frame = match read_frame(&mut read_half, inner.config.max_frame_bytes).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!(client = %inner.client_id, "server closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(client = %inner.client_id, error = %e, "read failed");
                break;
            }
        };
        let mut payload = frame;
        let envelope = match decode_envelope(&mut payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(client = %inner.client_id, error = %e, "undecodable frame");
                break;
            }
        };

        match envelope.message {
            Message::Invalidate {
                key,
                origin_client_id,
            } => {
                // Evict first, ack second: once the ack leaves, this
                // client must not serve the old value.
                inner.local.invalidate(&key);
                tracing::debug!(
                    client = %inner.client_id,
                    key = %key,
                    origin = %origin_client_id,
                    "evicted on server-initiated invalidation"
                );
                let ack = Envelope::new(
                    envelope.correlation_id,
                    Message::InvalidateAck { key },
                );
                if outbound.send(ack).await.is_err() {
                    break;
                }
            }
            Message::Heartbeat { .. } => {}
            _ => {
                let waiter = inner.pending.lock().remove(&envelope.correlation_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => {
                        tracing::debug!(
                            client = %inner.client_id,
                            correlation_id = envelope.correlation_id,
                            "response without a waiting request"
                        );
                    }
                }
            }
        }
    }

    connection_lost(&inner, generation);
}

/// Reader-side teardown. Only tears down the connection it belongs to: a
/// reconnect may already have installed a newer one.
fn connection_lost(inner: &Arc<ClientInner>, generation: u64) {
    let handle = {
        let mut conn = inner.conn.lock();
        match conn.as_ref() {
            Some(h) if h.generation == generation => conn.take(),
            _ => None,
        }
    };
    let Some(handle) = handle else {
        return;
    };
    handle.heartbeat.abort();
    handle.writer.abort();
    inner.connected_tx.send_replace(false);
    inner.fail_pending();
    // No invalidations can reach us anymore; nothing local can be trusted.
    inner.local.clear();
    tracing::info!(client = %inner.client_id, "connection to cache server lost");
}

async fn heartbeat_loop(
    inner: Arc<ClientInner>,
    outbound: mpsc::Sender<Envelope>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick
    loop {
        ticker.tick().await;
        let envelope = Envelope::new(
            inner.next_correlation(),
            Message::Heartbeat {
                timestamp: now_millis(),
            },
        );
        if outbound.send(envelope).await.is_err() {
            break;
        }
    }
}
