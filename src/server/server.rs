//! Coordinator lifecycle, dispatch, and the invalidation barrier.
//!
//! One `CacheServer` is the single authority for a cache. Clients register
//! over the transport with a shared secret; after that, their
//! put/get/invalidate requests are dispatched here. The coherence contract
//! lives in [`invalidation_barrier`]: a write or explicit invalidation is
//! acknowledged to its requester only after every holder of the key has
//! acked eviction, been detected disconnected, or timed out and been
//! demoted from the holder set.
//!
//! Each connection runs a read loop that handles control traffic
//! (INVALIDATE_ACK, HEARTBEAT, UNREGISTER) inline and spawns a task per
//! cache operation. Spawning keeps the read loop responsive while a
//! barrier is in flight, which matters when two clients write the same key
//! concurrently: each must be able to ack the other's fan-out while its
//! own request is parked on the key lock.

use crate::core::config::ServerConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::core::time::now_millis;
use crate::net::frame::{read_frame, write_frame};
use crate::net::locator::ServerHostData;
use crate::net::tls::{build_server_config, SecurityOptions};
use crate::net::transport::{BoxedStream, Listener};
use crate::proto::codec::{decode_envelope, encode_envelope};
use crate::proto::message::{Envelope, ErrorCode, Message};
use crate::server::registry::{CacheEntry, KeyRecord, Registry};
use crate::server::session::{ClientSession, SessionRegistry};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, timeout_at, Instant};

/// Frames queued per session before the client counts as unreachable.
const OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// The coordinating cache server.
pub struct CacheServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    shared_secret: String,
    host_data: ServerHostData,
    config: ServerConfig,
    registry: Registry,
    sessions: SessionRegistry,
    security: Mutex<SecurityOptions>,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    /// Source of correlation ids for server-initiated fan-out.
    fan_out_correlation: AtomicU64,
}

impl ServerInner {
    fn next_correlation(&self) -> u64 {
        self.fan_out_correlation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl CacheServer {
    /// Create a server with default tunables.
    pub fn new(shared_secret: impl Into<String>, host_data: ServerHostData) -> Self {
        Self::with_config(shared_secret, host_data, ServerConfig::default())
    }

    /// Create a server with explicit tunables.
    pub fn with_config(
        shared_secret: impl Into<String>,
        host_data: ServerHostData,
        config: ServerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                shared_secret: shared_secret.into(),
                host_data,
                config,
                registry: Registry::default(),
                sessions: SessionRegistry::default(),
                security: Mutex::new(SecurityOptions::default()),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown_tx,
                fan_out_correlation: AtomicU64::new(0),
            }),
        }
    }

    /// Bind TLS material to the server. Must be called before [`start`].
    ///
    /// [`start`]: CacheServer::start
    pub fn setup_security(&self, options: SecurityOptions) -> CacheResult<()> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(CacheError::Configuration(
                "security setup must happen before start".to_string(),
            ));
        }
        *self.inner.security.lock() = options;
        Ok(())
    }

    /// Bind the transport and begin accepting registrations.
    ///
    /// Returns the bound address (useful when configured with port 0).
    /// Calling `start` twice fails with [`CacheError::AlreadyStarted`].
    pub async fn start(&self) -> CacheResult<SocketAddr> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CacheError::AlreadyStarted);
        }
        match self.bind_and_spawn().await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn bind_and_spawn(&self) -> CacheResult<SocketAddr> {
        let inner = &self.inner;
        let tls = if inner.host_data.ssl {
            let options = inner.security.lock().clone();
            Some(build_server_config(&options, &inner.host_data.identity)?)
        } else {
            None
        };

        let bind = (inner.host_data.host.as_str(), inner.host_data.port);
        let listener = Listener::bind(bind, tls).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            ssl = inner.host_data.ssl,
            identity = %inner.host_data.identity,
            "cache server listening"
        );

        let inner = self.inner.clone();
        let mut shutdown = inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let inner = inner.clone();
                            tokio::spawn(async move {
                                handle_connection(inner, stream, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
            tracing::debug!("accept loop stopped");
        });

        Ok(local_addr)
    }

    /// Stop accepting connections and close every session. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);
        for session in self.inner.sessions.all() {
            session.close();
            self.inner.sessions.remove_exact(&session);
            self.inner.registry.purge_client(&session.client_id).await;
        }
        tracing::info!("cache server closed");
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Number of keys the registry has ever tracked.
    pub fn key_count(&self) -> usize {
        self.inner.registry.key_count()
    }
}

async fn handle_connection(inner: Arc<ServerInner>, stream: BoxedStream, peer: SocketAddr) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let max_frame = inner.config.max_frame_bytes;
    let idle = inner.config.session_idle_timeout();

    // The first frame must be REGISTER, within the idle window.
    let first = match timeout(idle, read_frame(&mut read_half, max_frame)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) | Ok(Err(_)) | Err(_) => {
            tracing::debug!(%peer, "connection dropped before registration");
            return;
        }
    };
    let mut payload = first;
    let envelope = match decode_envelope(&mut payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "undecodable registration frame");
            return;
        }
    };
    let (register_id, client_id, shared_secret) = match envelope {
        Envelope {
            correlation_id,
            message:
                Message::Register {
                    client_id,
                    shared_secret,
                },
        } => (correlation_id, client_id, shared_secret),
        other => {
            tracing::warn!(%peer, kind = ?other.message.kind(), "first message was not REGISTER");
            let reply = Envelope::new(
                other.correlation_id,
                Message::Error {
                    code: ErrorCode::NotRegistered,
                    message: "expected REGISTER".to_string(),
                },
            );
            let _ = write_envelope_direct(&mut write_half, &reply).await;
            return;
        }
    };

    if shared_secret != inner.shared_secret {
        tracing::warn!(%peer, client = %client_id, "registration rejected: shared secret mismatch");
        let reply = Envelope::new(
            register_id,
            Message::RegisterAck {
                accepted: false,
                reason: "invalid shared secret".to_string(),
            },
        );
        let _ = write_envelope_direct(&mut write_half, &reply).await;
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE_DEPTH);
    let session = Arc::new(ClientSession::new(client_id.clone(), outbound_tx));
    if let Some(old) = inner.sessions.register(session.clone()) {
        tracing::info!(client = %client_id, "replacing stale session for reconnecting client");
        disconnect_cleanup(&inner, &old).await;
    }

    let writer = tokio::spawn(async move {
        let mut buf = BytesMut::new();
        while let Some(envelope) = outbound_rx.recv().await {
            buf.clear();
            encode_envelope(&envelope, &mut buf);
            if write_frame(&mut write_half, &buf).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    session.send(Envelope::new(
        register_id,
        Message::RegisterAck {
            accepted: true,
            reason: String::new(),
        },
    ));
    tracing::info!(client = %client_id, %peer, "client registered");

    let mut shutdown = inner.shutdown_tx.subscribe();
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            result = timeout(idle, read_frame(&mut read_half, max_frame)) => match result {
                Err(_) => {
                    tracing::warn!(client = %session.client_id, idle_ms = session.idle_ms(), "session idle timeout");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(client = %session.client_id, error = %e, "read failed");
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(frame))) => frame,
            }
        };
        session.touch();

        let mut payload = frame;
        let envelope = match decode_envelope(&mut payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(client = %session.client_id, error = %e, "undecodable frame, closing");
                break;
            }
        };

        match &envelope.message {
            Message::Put { .. } | Message::Get { .. } | Message::Invalidate { .. } => {
                let inner = inner.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    handle_operation(inner, session, envelope).await;
                });
            }
            Message::InvalidateAck { .. } => {
                session.complete_ack(envelope.correlation_id);
            }
            Message::Heartbeat { .. } => {
                session.send(Envelope::new(
                    envelope.correlation_id,
                    Message::Heartbeat {
                        timestamp: now_millis(),
                    },
                ));
            }
            Message::Unregister { .. } => {
                tracing::debug!(client = %session.client_id, "client unregistered");
                break;
            }
            _ => {
                session.send(Envelope::new(
                    envelope.correlation_id,
                    Message::Error {
                        code: ErrorCode::BadRequest,
                        message: format!("unexpected {:?} from client", envelope.message.kind()),
                    },
                ));
            }
        }
    }

    disconnect_cleanup(&inner, &session).await;
    writer.abort();
    tracing::debug!(client = %session.client_id, %peer, "connection closed");
}

/// Close a session and erase every trace of it: session map entry, holder
/// memberships, and any barrier waiting on its acks.
async fn disconnect_cleanup(inner: &Arc<ServerInner>, session: &Arc<ClientSession>) {
    session.close();
    inner.sessions.remove_exact(session);
    let purged = inner.registry.purge_client(&session.client_id).await;
    if purged > 0 {
        tracing::debug!(
            client = %session.client_id,
            keys = purged,
            "purged disconnected client from holder sets"
        );
    }
}

async fn handle_operation(
    inner: Arc<ServerInner>,
    session: Arc<ClientSession>,
    envelope: Envelope,
) {
    let correlation_id = envelope.correlation_id;
    match envelope.message {
        Message::Put { key, value, expiry } => {
            let state = inner.registry.key_state(&key);
            let mut record = state.record.lock().await;
            let version = record.next_version();
            record.entry = Some(CacheEntry {
                value,
                expiry,
                version,
            });
            let targets: Vec<String> = record
                .holders
                .iter()
                .filter(|id| id.as_str() != session.client_id)
                .cloned()
                .collect();
            invalidation_barrier(&inner, &mut record, &key, &session.client_id, targets).await;
            // The writer is the sole holder going forward.
            record.holders.clear();
            record.holders.insert(session.client_id.clone());
            drop(record);
            session.send(Envelope::new(correlation_id, Message::PutAck { key, version }));
        }
        Message::Get { key } => {
            let reply = match inner.registry.try_key_state(&key) {
                None => absent_result(key),
                Some(state) => {
                    let mut record = state.record.lock().await;
                    match record.live_entry(now_millis()).cloned() {
                        Some(entry) => {
                            record.holders.insert(session.client_id.clone());
                            Message::GetResult {
                                key,
                                value: Some(entry.value),
                                version: entry.version,
                                expiry: entry.expiry,
                            }
                        }
                        None => absent_result(key),
                    }
                }
            };
            session.send(Envelope::new(correlation_id, reply));
        }
        Message::Invalidate { key, .. } => {
            if let Some(state) = inner.registry.try_key_state(&key) {
                let mut record = state.record.lock().await;
                record.entry = None;
                let targets: Vec<String> = record.holders.iter().cloned().collect();
                invalidation_barrier(&inner, &mut record, &key, &session.client_id, targets).await;
                record.holders.clear();
            }
            session.send(Envelope::new(correlation_id, Message::InvalidateAck { key }));
        }
        other => {
            tracing::warn!(kind = ?other.kind(), "operation dispatcher got a non-operation");
        }
    }
}

fn absent_result(key: String) -> Message {
    Message::GetResult {
        key,
        value: None,
        version: 0,
        expiry: crate::core::time::Expiry::NEVER,
    }
}

/// Fan INVALIDATE out to `targets` and wait until each one acks, drops, or
/// times out. Demoted holders are removed from `record.holders`.
///
/// The caller holds the per-key lock across this call; that is what makes
/// the barrier a barrier.
async fn invalidation_barrier(
    inner: &Arc<ServerInner>,
    record: &mut KeyRecord,
    key: &str,
    origin: &str,
    targets: Vec<String>,
) {
    if targets.is_empty() {
        return;
    }

    let mut waiters = Vec::with_capacity(targets.len());
    for holder_id in targets {
        let Some(holder) = inner.sessions.get(&holder_id) else {
            record.holders.remove(&holder_id);
            continue;
        };
        let fan_id = inner.next_correlation();
        let Some(ack) = holder.expect_ack(fan_id) else {
            // Session is already closing; implicit ack.
            record.holders.remove(&holder_id);
            continue;
        };
        let sent = holder.send(Envelope::new(
            fan_id,
            Message::Invalidate {
                key: key.to_string(),
                origin_client_id: origin.to_string(),
            },
        ));
        if sent {
            waiters.push((holder_id, holder, fan_id, ack));
        } else {
            holder.cancel_ack(fan_id);
            record.holders.remove(&holder_id);
            tracing::debug!(client = %holder.client_id, key, "holder unreachable, demoted");
        }
    }

    let deadline = Instant::now() + inner.config.invalidation_timeout();
    for (holder_id, holder, fan_id, ack) in waiters {
        match timeout_at(deadline, ack).await {
            Ok(Ok(())) => {
                record.holders.remove(&holder_id);
            }
            Ok(Err(_)) => {
                // Sender dropped: the holder disconnected mid-barrier.
                tracing::debug!(client = %holder_id, key, "holder disconnected, implicit ack");
                record.holders.remove(&holder_id);
            }
            Err(_) => {
                tracing::warn!(
                    client = %holder_id,
                    key,
                    timeout_ms = inner.config.invalidation_timeout_ms,
                    "holder did not ack invalidation in time, demoting"
                );
                holder.cancel_ack(fan_id);
                record.holders.remove(&holder_id);
            }
        }
    }
}

async fn write_envelope_direct<W>(writer: &mut W, envelope: &Envelope) -> CacheResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_envelope(envelope, &mut buf);
    write_frame(writer, &buf).await
}
