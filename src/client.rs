//! Bus client
//!
//! Convenience wrapper used by instruments, control loops, and consoles
//! to talk to the broker.

use std::io::BufReader;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver};

use crate::error::{BusError, Result};
use crate::protocol::{codec, PersistenceLevel, Value};

/// One broadcast frame as seen by a client
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Declared identity of the connection that sent it
    pub source: String,

    /// Record name under that source
    pub record: String,

    /// Payload; `Null` signifies erasure of `(source, record)`
    pub value: Value,
}

/// A connected bus client.
///
/// A reader thread decodes inbound broadcasts into an internal channel;
/// sends go straight to the socket. When the connection was opened with
/// `no_echo`, frames whose source matches this client's own identity
/// are filtered out here — the broker itself always echoes.
pub struct BusClient {
    source: String,
    stream: UnixStream,
    inbound: Receiver<BusMessage>,
    reader: Option<thread::JoinHandle<()>>,
}

impl BusClient {
    /// Connect to the broker and perform the handshake.
    ///
    /// Everything currently persistent arrives as the first messages,
    /// in descending persistence-level order.
    pub fn connect(path: impl AsRef<Path>, source: &str, no_echo: bool) -> Result<Self> {
        let mut stream = UnixStream::connect(path)?;
        codec::write_handshake(&mut stream, source, no_echo)?;

        let read_stream = stream.try_clone()?;
        let (tx, rx) = unbounded();
        let own_source = source.to_string();

        let reader = thread::Builder::new()
            .name(format!("acqbus-client-{}", source))
            .spawn(move || {
                let mut reader = BufReader::new(read_stream);
                loop {
                    match codec::read_broadcast(&mut reader) {
                        Ok((source, record, value)) => {
                            if no_echo && source == own_source {
                                continue;
                            }
                            let delivered = tx.send(BusMessage {
                                source,
                                record,
                                value,
                            });
                            if delivered.is_err() {
                                return;
                            }
                        }
                        Err(BusError::Disconnected) => return,
                        Err(e) => {
                            tracing::debug!("Bus client read loop ended: {}", e);
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            source: source.to_string(),
            stream,
            inbound: rx,
            reader: Some(reader),
        })
    }

    /// Send a broadcast-only message (never stored)
    pub fn send_data(&mut self, record: &str, value: Value) -> Result<()> {
        self.send_at(PersistenceLevel::Data, record, value)
    }

    /// Publish a STATE-level record (persisted, owned by this connection)
    pub fn set_state(&mut self, record: &str, value: Value) -> Result<()> {
        self.send_at(PersistenceLevel::State, record, value)
    }

    /// Publish a SOURCE-level record (persisted, owned by this connection)
    pub fn set_source_info(&mut self, record: &str, value: Value) -> Result<()> {
        self.send_at(PersistenceLevel::Source, record, value)
    }

    /// Publish a SYSTEM-level record (persisted globally, unowned)
    pub fn set_system_info(&mut self, record: &str, value: Value) -> Result<()> {
        self.send_at(PersistenceLevel::System, record, value)
    }

    /// Erase a previously published record
    pub fn erase(&mut self, record: &str) -> Result<()> {
        self.send_at(PersistenceLevel::State, record, Value::Null)
    }

    /// Send one message at an explicit persistence level
    pub fn send_at(&mut self, level: PersistenceLevel, record: &str, value: Value) -> Result<()> {
        codec::write_message(&mut self.stream, level, record, &value)
    }

    /// Receive the next broadcast, blocking until one arrives
    pub fn recv(&self) -> Result<BusMessage> {
        self.inbound.recv().map_err(|_| BusError::Disconnected)
    }

    /// Receive the next broadcast, or `None` if the timeout elapses or
    /// the connection is gone
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BusMessage> {
        self.inbound.recv_timeout(timeout).ok()
    }

    /// Receive a broadcast if one is already queued
    pub fn try_recv(&self) -> Option<BusMessage> {
        self.inbound.try_recv().ok()
    }

    /// Run a callback for every inbound broadcast on a background
    /// thread until the connection closes.
    ///
    /// Messages consumed by the callback are not observed by `recv`.
    pub fn on_message<F>(&self, mut callback: F) -> thread::JoinHandle<()>
    where
        F: FnMut(BusMessage) + Send + 'static,
    {
        let inbound = self.inbound.clone();
        thread::spawn(move || {
            while let Ok(message) = inbound.recv() {
                callback(message);
            }
        })
    }

    /// The source identity this client declared at handshake
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
