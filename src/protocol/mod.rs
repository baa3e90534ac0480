//! Protocol Module
//!
//! Defines the wire protocol spoken between the broker and its clients.
//!
//! ## Protocol Format (V1 - Simple Binary)
//!
//! All integers are big-endian. Strings are `u32` length + UTF-8 bytes.
//! Values are one tag byte followed by a tag-specific payload (see
//! [`codec`] for the full table); a value is self-delimiting, so frames
//! need no outer length header.
//!
//! ### Handshake (client -> broker, once per connection)
//! ```text
//! ┌──────────────────┬─────────────┐
//! │ source: string   │ no_echo: u8 │
//! └──────────────────┴─────────────┘
//! ```
//! `no_echo` nonzero means the client does not want its own messages
//! echoed back; enforcement is the client library's concern.
//!
//! ### Message (client -> broker, repeated)
//! ```text
//! ┌───────────┬──────────────────┬────────────────┐
//! │ level: u8 │ record: string   │ value: Value   │
//! └───────────┴──────────────────┴────────────────┘
//! ```
//! `level` must decode to one of DATA(0)/STATE(1)/SOURCE(2)/SYSTEM(3);
//! anything else is a protocol error that terminates the connection.
//!
//! ### Broadcast (broker -> client, repeated; also the snapshot framing)
//! ```text
//! ┌──────────────────┬──────────────────┬────────────────┐
//! │ source: string   │ record: string   │ value: Value   │
//! └──────────────────┴──────────────────┴────────────────┘
//! ```
//! A `Null` value signifies erasure of the `(source, record)` pair.

mod level;
mod value;
pub mod codec;

pub use level::PersistenceLevel;
pub use value::Value;
