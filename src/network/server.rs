//! Bus Server
//!
//! Accepts connections on the Unix socket and runs one reader thread
//! per client.

use std::io::{BufReader, ErrorKind};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{BusError, Result};
use crate::protocol::codec;
use crate::store::ConnectionId;

/// Unix-socket server for the acquisition bus
pub struct Server {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
}

/// Remote control for a running server
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Signal the server to stop accepting and tear down all connections
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Server {
    /// Create a new server with the given config and dispatcher
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle usable to shut the server down from another thread
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Run the accept loop (blocking until shutdown).
    ///
    /// The listener is non-blocking and polled against the shutdown
    /// flag. On shutdown every client transport is closed, which lets
    /// each read loop deregister and broadcast erasures for any owned
    /// records before the server returns.
    pub fn run(&mut self) -> Result<()> {
        let path = self.config.socket_path.clone();

        // A stale socket file from a dead process would fail the bind
        if path.exists() {
            tracing::debug!("Removing stale socket file {}", path.display());
            let _ = std::fs::remove_file(&path);
        }

        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        tracing::info!("Listening on {}", path.display());

        let poll_interval = Duration::from_millis(self.config.accept_poll_interval_ms);
        let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    tracing::debug!("Incoming connection");
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::warn!("Failed to configure client stream: {}", e);
                        continue;
                    }
                    let dispatcher = Arc::clone(&self.dispatcher);
                    workers.push(thread::spawn(move || serve_client(stream, dispatcher)));
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    workers.retain(|worker| !worker.is_finished());
                    thread::sleep(poll_interval);
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        tracing::info!("Shutting down, closing {} connections", workers.len());
        self.dispatcher.shutdown();
        for worker in workers {
            let _ = worker.join();
        }
        let _ = std::fs::remove_file(&path);

        Ok(())
    }
}

/// Handle one client from handshake to teardown.
///
/// Handshake failures just drop the transport; once registered, the
/// read loop runs until EOF or error and deregistration always follows.
fn serve_client(stream: UnixStream, dispatcher: Arc<Dispatcher>) {
    let mut reader = match stream.try_clone() {
        Ok(read_stream) => BufReader::new(read_stream),
        Err(e) => {
            tracing::debug!("Failed to clone client stream: {}", e);
            return;
        }
    };

    let (source, no_echo) = match codec::read_handshake(&mut reader) {
        Ok(handshake) => handshake,
        Err(e) => {
            tracing::debug!("Handshake failed: {}", e);
            return;
        }
    };

    let id = match dispatcher.register(&source, no_echo, stream) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Failed to register {}: {}", source, e);
            return;
        }
    };

    read_frames(&mut reader, id, &source, &dispatcher);
    dispatcher.deregister(id);
}

/// Read message frames until the stream ends
fn read_frames(
    reader: &mut BufReader<UnixStream>,
    id: ConnectionId,
    source: &str,
    dispatcher: &Dispatcher,
) {
    loop {
        match codec::read_message(reader) {
            Ok((level, record, value)) => {
                tracing::trace!("{} sent {} {:?}", source, level, record);
                dispatcher.dispatch(id, level, &record, value);
            }
            Err(BusError::Disconnected) => {
                tracing::debug!("Client {} disconnected", source);
                return;
            }
            Err(BusError::Io(ref e)) if e.kind() == ErrorKind::ConnectionReset => {
                tracing::debug!("Connection reset by {}", source);
                return;
            }
            Err(BusError::Io(ref e)) if e.kind() == ErrorKind::ConnectionAborted => {
                tracing::debug!("Connection aborted by {}", source);
                return;
            }
            Err(e) => {
                tracing::warn!("Error reading from {}: {}", source, e);
                return;
            }
        }
    }
}
