//! Dispatcher Module
//!
//! The central broker object that every message flows through.
//!
//! ## Responsibilities
//! - Own the Persistence Store and the set of live connections
//! - Apply persistent writes/erasures before relaying
//! - Broadcast every message to every registered connection
//! - Replay the persistent snapshot to newly registered connections
//! - Erase a connection's owned records when it goes away

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::network::ConnectionHandle;
use crate::protocol::{codec, PersistenceLevel, Value};
use crate::store::{Applied, ConnectionId, OwnershipChange, PersistenceStore};

/// The central message broker
///
/// ## Concurrency Model: Single Critical Section
///
/// The store and the connection map live behind one mutex, and every
/// state transition (register + snapshot, apply + broadcast,
/// deregister + erasure broadcast) runs entirely inside it. That gives:
///
/// - **Snapshot atomicity**: a registering connection sees the exact
///   store state at its registration point, then every later dispatch,
///   with no gap and no duplicate.
/// - **Total broadcast order**: any two dispatch events reach every
///   connection's queue in the same relative order.
///
/// The lock is never held across a socket write: broadcast frames are
/// encoded once and pushed onto per-connection queues, and the writer
/// threads do the actual I/O outside the critical section.
pub struct Dispatcher {
    shared: Mutex<Shared>,

    /// Monotonic connection id counter
    next_id: AtomicU64,

    /// Capacity of each connection's outbound queue
    queue_capacity: usize,
}

/// State guarded by the dispatcher's critical section
struct Shared {
    store: PersistenceStore,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty store and no connections
    pub fn new(config: &Config) -> Self {
        Self {
            shared: Mutex::new(Shared {
                store: PersistenceStore::new(),
                connections: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            queue_capacity: config.outbound_queue_capacity,
        }
    }

    /// Register a connection that completed its handshake.
    ///
    /// The snapshot of all persistent records is queued to the new
    /// connection and the connection joins the live set in one critical
    /// section, so no concurrent dispatch can be missed or doubled.
    pub fn register(&self, source: &str, no_echo: bool, stream: UnixStream) -> Result<ConnectionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::spawn(id, source, no_echo, stream, self.queue_capacity)?;

        let mut shared = self.shared.lock();
        let snapshot = shared.store.snapshot();
        let replayed = snapshot.len();
        for (src, record, value) in snapshot {
            let frame = codec::encode_broadcast(&src, &record, &value)?;
            handle.enqueue(frame.into());
        }
        shared.connections.insert(id, handle);
        drop(shared);

        tracing::info!(
            "Registered connection {} as {:?} (no_echo={}, {} records replayed)",
            id,
            source,
            no_echo,
            replayed
        );
        Ok(id)
    }

    /// Process one inbound message from a registered connection.
    ///
    /// Persistent levels update the store first; every message is then
    /// relayed verbatim as `(source, record, value)` to all registered
    /// connections, the origin included. Echo suppression is the
    /// receiving client's own concern. A failed delivery to one peer
    /// marks that peer dead and never disturbs the others.
    pub fn dispatch(&self, origin: ConnectionId, level: PersistenceLevel, record: &str, value: Value) {
        let mut shared = self.shared.lock();

        let source = match shared.connections.get(&origin) {
            Some(handle) => handle.source().to_string(),
            None => {
                tracing::debug!("Dropping message from unregistered connection {}", origin);
                return;
            }
        };

        let frame = match codec::encode_broadcast(&source, record, &value) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode broadcast for {}:{}: {}", source, record, e);
                return;
            }
        };

        if level.is_persistent() {
            let applied = shared.store.apply(origin, &source, level, record, value);
            self.log_ownership(&shared, &source, record, level, applied);
        }

        Self::fan_out(&shared, frame.into());
    }

    /// Remove a connection and erase everything it owned.
    ///
    /// The erasure broadcasts go to the surviving connections; this runs
    /// even when the departing transport is already unusable.
    pub fn deregister(&self, conn: ConnectionId) {
        let mut shared = self.shared.lock();
        let handle = match shared.connections.remove(&conn) {
            Some(handle) => handle,
            None => return,
        };

        let released = shared.store.release(conn);
        for key in &released {
            match codec::encode_broadcast(&key.source, &key.record, &Value::Null) {
                Ok(frame) => Self::fan_out(&shared, frame.into()),
                Err(e) => tracing::error!("Failed to encode erasure for {}: {}", key, e),
            }
        }
        drop(shared);

        tracing::info!(
            "Deregistered connection {} ({}), erased {} owned records",
            conn,
            handle.source(),
            released.len()
        );
        handle.shutdown();
    }

    /// Shut down every live transport so each read loop unblocks and
    /// deregisters itself (best-effort erasure broadcasts on exit)
    pub fn shutdown(&self) {
        let shared = self.shared.lock();
        for handle in shared.connections.values() {
            handle.shutdown();
        }
    }

    /// Number of currently registered connections
    pub fn connection_count(&self) -> usize {
        self.shared.lock().connections.len()
    }

    /// Number of currently stored persistent records
    pub fn record_count(&self) -> usize {
        self.shared.lock().store.len()
    }

    fn fan_out(shared: &Shared, frame: Arc<[u8]>) {
        for handle in shared.connections.values() {
            handle.enqueue(frame.clone());
        }
    }

    fn log_ownership(
        &self,
        shared: &Shared,
        source: &str,
        record: &str,
        level: PersistenceLevel,
        applied: Applied,
    ) {
        let ownership = match applied {
            Applied::Stored { ownership } => ownership,
            _ => return,
        };
        match ownership {
            OwnershipChange::TakenFrom(prev) => {
                let prev_name = shared
                    .connections
                    .get(&prev)
                    .map(|handle| handle.source().to_string())
                    .unwrap_or_else(|| format!("connection {}", prev));
                tracing::warn!(
                    "{} taking ownership of {}:{} from {}",
                    source,
                    source,
                    record,
                    prev_name
                );
            }
            OwnershipChange::Demoted => {
                tracing::warn!(
                    "SYSTEM record {}:{} demoted to {} by {}",
                    source,
                    record,
                    level,
                    source
                );
            }
            OwnershipChange::PromotedToSystem => {
                tracing::warn!(
                    "{} promoted its record {}:{} to SYSTEM; record is now unowned",
                    source,
                    source,
                    record
                );
            }
            OwnershipChange::Claimed | OwnershipChange::Unchanged => {}
        }
    }
}
