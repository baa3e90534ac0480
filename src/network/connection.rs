//! Connection Handle
//!
//! Dispatcher-side state for one registered client connection.

use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Sender};

use crate::error::Result;
use crate::store::ConnectionId;

/// One registered connection, as the dispatcher sees it.
///
/// Broadcast frames are pushed onto a bounded queue drained by a
/// dedicated writer thread, so fan-out never blocks on a slow peer's
/// socket. The write path is permanently dead after its first error;
/// full teardown stays with the connection's read loop.
pub struct ConnectionHandle {
    id: ConnectionId,

    /// Source identity declared at handshake
    source: String,

    /// Client asked for its own messages to be suppressed.
    /// Recorded but not enforced here; the client library filters.
    no_echo: bool,

    /// Outbound frame queue feeding the writer thread
    frames: Sender<Arc<[u8]>>,

    /// Stream clone used to force the peer's read loop awake
    stream: UnixStream,

    /// Set once the write path is known unusable
    dead: AtomicBool,
}

impl ConnectionHandle {
    /// Create the handle and spawn its writer thread
    pub fn spawn(
        id: ConnectionId,
        source: &str,
        no_echo: bool,
        stream: UnixStream,
        queue_capacity: usize,
    ) -> Result<Self> {
        let shutdown_clone = stream.try_clone()?;
        let (tx, rx) = bounded::<Arc<[u8]>>(queue_capacity);

        // The writer runs detached; it exits when the queue closes or
        // the first write fails
        let writer_source = source.to_string();
        let _writer = thread::Builder::new()
            .name(format!("acqbus-writer-{}", id))
            .spawn(move || {
                let mut stream = stream;
                while let Ok(frame) = rx.recv() {
                    let outcome = stream.write_all(&frame).and_then(|_| stream.flush());
                    if let Err(e) = outcome {
                        tracing::debug!(
                            "Write to {} failed, stopping writer: {}",
                            writer_source,
                            e
                        );
                        // Wake the read loop so the connection gets reaped
                        let _ = stream.shutdown(Shutdown::Both);
                        break;
                    }
                }
            })?;

        Ok(Self {
            id,
            source: source.to_string(),
            no_echo,
            frames: tx,
            stream: shutdown_clone,
            dead: AtomicBool::new(false),
        })
    }

    /// Queue one encoded frame for delivery.
    ///
    /// Never blocks. A full or closed queue marks the connection dead
    /// and shuts its transport down so the read loop tears it down;
    /// delivery to other connections is unaffected.
    pub fn enqueue(&self, frame: Arc<[u8]>) -> bool {
        if self.dead.load(Ordering::Relaxed) {
            return false;
        }
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                if !self.dead.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Outbound queue for {} unavailable, dropping connection",
                        self.source
                    );
                    let _ = self.stream.shutdown(Shutdown::Both);
                }
                false
            }
        }
    }

    /// Shut the transport down in both directions (idempotent)
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn no_echo(&self) -> bool {
        self.no_echo
    }
}
