//! Persistence level definitions
//!
//! Governs replay-on-connect and ownership of bus records.

use crate::error::{BusError, Result};

/// How long a message outlives its broadcast.
///
/// Ordering matters: snapshots replay records in descending level order,
/// and the ownership rules key off SYSTEM being the top of the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PersistenceLevel {
    /// Broadcast-only; never stored
    Data = 0x00,

    /// Persisted, owned by the sending connection; lowest replay precedence
    State = 0x01,

    /// Persisted, owned by the sending connection; replayed before STATE
    Source = 0x02,

    /// Persisted globally with no owning connection; replayed first
    System = 0x03,
}

impl PersistenceLevel {
    /// Decode a level from its wire byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(PersistenceLevel::Data),
            0x01 => Ok(PersistenceLevel::State),
            0x02 => Ok(PersistenceLevel::Source),
            0x03 => Ok(PersistenceLevel::System),
            _ => Err(BusError::Protocol(format!(
                "Unknown persistence level: 0x{:02x}",
                byte
            ))),
        }
    }

    /// The wire byte for this level
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether messages at this level are stored for replay
    pub fn is_persistent(self) -> bool {
        self != PersistenceLevel::Data
    }
}

impl std::fmt::Display for PersistenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PersistenceLevel::Data => "DATA",
            PersistenceLevel::State => "STATE",
            PersistenceLevel::Source => "SOURCE",
            PersistenceLevel::System => "SYSTEM",
        };
        f.write_str(name)
    }
}
