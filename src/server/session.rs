//! Registered client sessions.
//!
//! A session is the server-side record of one connected, registered
//! client: its identity, an outbound frame queue drained by the
//! connection's writer task, and the acknowledgements it still owes for
//! in-flight invalidation fan-out. Closing a session drops every pending
//! ack waker, which the barrier treats as an implicit ack, so a
//! disconnecting client can never wedge a write.

use crate::core::time::now_millis;
use crate::proto::message::Envelope;
use crate::server::registry::ClientId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Liveness state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered and serving traffic.
    Connected,
    /// Close has begun; no new acks are expected.
    Disconnecting,
    /// Fully closed and purged.
    Closed,
}

/// Server-side record of one registered client.
#[derive(Debug)]
pub struct ClientSession {
    /// Identity presented on REGISTER.
    pub client_id: ClientId,
    outbound: mpsc::Sender<Envelope>,
    state: Mutex<SessionState>,
    /// Correlation id -> waker for an INVALIDATE_ACK this client owes.
    /// `None` once the session no longer accepts acks.
    pending_acks: Mutex<Option<HashMap<u64, oneshot::Sender<()>>>>,
    last_seen_ms: AtomicU64,
}

impl ClientSession {
    /// Create a session draining into the given outbound queue.
    pub fn new(client_id: ClientId, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            client_id,
            outbound,
            state: Mutex::new(SessionState::Connected),
            pending_acks: Mutex::new(Some(HashMap::new())),
            last_seen_ms: AtomicU64::new(now_millis()),
        }
    }

    /// Current liveness state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether the session still serves traffic.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Queue a frame for the writer task. `false` means the client is
    /// unreachable (queue full or writer gone).
    pub fn send(&self, envelope: Envelope) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound.try_send(envelope).is_ok()
    }

    /// Register interest in an INVALIDATE_ACK for the given fan-out
    /// correlation id. `None` when the session is already closing.
    pub fn expect_ack(&self, correlation_id: u64) -> Option<oneshot::Receiver<()>> {
        let mut pending = self.pending_acks.lock();
        let map = pending.as_mut()?;
        let (tx, rx) = oneshot::channel();
        map.insert(correlation_id, tx);
        Some(rx)
    }

    /// Complete a pending ack. Unknown ids are ignored (late ack after a
    /// barrier timeout already demoted this holder).
    pub fn complete_ack(&self, correlation_id: u64) {
        let mut pending = self.pending_acks.lock();
        if let Some(map) = pending.as_mut() {
            if let Some(tx) = map.remove(&correlation_id) {
                let _ = tx.send(());
            }
        }
    }

    /// Forget a registered ack without firing it.
    pub fn cancel_ack(&self, correlation_id: u64) {
        let mut pending = self.pending_acks.lock();
        if let Some(map) = pending.as_mut() {
            map.remove(&correlation_id);
        }
    }

    /// Record inbound traffic for idle detection.
    pub fn touch(&self) {
        self.last_seen_ms.store(now_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since the last inbound message.
    pub fn idle_ms(&self) -> u64 {
        now_millis().saturating_sub(self.last_seen_ms.load(Ordering::Relaxed))
    }

    /// Begin closing: stop accepting acks and release every barrier still
    /// waiting on this client. Safe to call more than once.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Disconnecting;
        }
        // Dropping the senders wakes every waiting barrier with an
        // implicit ack.
        let dropped = self.pending_acks.lock().take();
        drop(dropped);
        *self.state.lock() = SessionState::Closed;
    }
}

/// Map of registered sessions by client id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, Arc<ClientSession>>>,
}

impl SessionRegistry {
    /// Insert a session, returning the one it displaced (same client id
    /// reconnecting) so the caller can close it.
    pub fn register(&self, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        self.sessions
            .write()
            .insert(session.client_id.clone(), session)
    }

    /// Look up a live session.
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(client_id).cloned()
    }

    /// Remove a session, but only the exact instance given: a client that
    /// reconnected must not have its replacement session removed by the
    /// old connection's cleanup.
    pub fn remove_exact(&self, session: &Arc<ClientSession>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(&session.client_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&session.client_id);
                true
            }
            _ => false,
        }
    }

    /// All live sessions.
    pub fn all(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
