//! Network Module
//!
//! Unix-socket server and per-connection handling.
//!
//! ## Architecture
//! - Single acceptor thread, polled against a shutdown flag
//! - One reader thread per connection, feeding the Dispatcher
//! - One writer thread per connection, draining its outbound queue

mod server;
mod connection;

pub use server::{Server, ServerHandle};
pub use connection::ConnectionHandle;
