//! Persistence Store Module
//!
//! In-memory table of persistent bus records.
//!
//! ## Responsibilities
//! - Hold the most recent value for every persistent `(source, record)` key
//! - Track which connection owns each record (SYSTEM records are unowned)
//! - Apply the ownership state machine on every write and erasure
//! - Produce the snapshot replayed to newly connecting clients
//!
//! ## Data Structure Choice
//! A plain `HashMap` keyed by `(source, record)` plus a per-connection
//! reverse index of owned keys. The store carries no lock of its own:
//! the dispatcher's single critical section is the only synchronization
//! domain, and keeping the record map and the ownership index in one
//! struct lets every transition mutate both sides together.

mod table;

pub use table::PersistenceStore;

use crate::protocol::{PersistenceLevel, Value};

/// Stable identifier for a registered connection.
///
/// Connections are referenced by id rather than pointer so a record can
/// name its owner without tying lifetimes together.
pub type ConnectionId = u64;

/// Composite identity of a persistent record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistenceKey {
    /// Source identity declared by a connection at handshake time
    pub source: String,

    /// Application-defined record name under that source
    pub record: String,
}

impl PersistenceKey {
    pub fn new(source: impl Into<String>, record: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            record: record.into(),
        }
    }
}

impl std::fmt::Display for PersistenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.record)
    }
}

/// A stored record
#[derive(Debug, Clone)]
pub struct PersistentRecord {
    pub level: PersistenceLevel,

    /// Never `Null` while stored; erasure removes the record instead
    pub value: Value,

    /// Owning connection, or `None` for SYSTEM-level (global) records
    pub owner: Option<ConnectionId>,

    /// Insertion sequence, used to keep snapshot order stable
    pub seq: u64,
}

/// How a write changed record ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipChange {
    /// Same owner before and after
    Unchanged,

    /// Previously absent or unowned key claimed without conflict
    Claimed,

    /// A different connection owned the record; ownership moved
    TakenFrom(ConnectionId),

    /// A SYSTEM record was overwritten at a lower level and is now owned
    Demoted,

    /// The owner rewrote its record at SYSTEM level; it is now unowned
    PromotedToSystem,
}

/// Outcome of [`PersistenceStore::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Non-null value stored (insert or overwrite)
    Stored { ownership: OwnershipChange },

    /// Erasure removed an existing record
    ErasedExisting,

    /// Erasure of an absent key; ignored
    ErasedNothing,
}
