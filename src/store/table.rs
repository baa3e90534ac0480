//! Persistence store implementation
//!
//! HashMap-based record table with the ownership state machine.

use std::collections::{HashMap, HashSet};

use crate::protocol::{PersistenceLevel, Value};
use super::{Applied, ConnectionId, OwnershipChange, PersistenceKey, PersistentRecord};

/// Table of persistent records plus the per-connection ownership index
///
/// Not internally synchronized; callers serialize access through the
/// dispatcher's critical section.
#[derive(Debug, Default)]
pub struct PersistenceStore {
    /// Source of truth: every stored record, keyed by (source, record)
    records: HashMap<PersistenceKey, PersistentRecord>,

    /// Derived index: keys owned by each connection. Kept in sync with
    /// `records[key].owner` on every transition.
    owned: HashMap<ConnectionId, HashSet<PersistenceKey>>,

    /// Monotonic insertion counter for stable snapshot ordering
    next_seq: u64,
}

impl PersistenceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one persistent write or erasure from `origin`.
    ///
    /// `source` is the origin connection's declared identity; together
    /// with `record` it forms the key. Callers must not pass DATA-level
    /// messages — those are broadcast-only and never touch the store.
    ///
    /// Ownership and precedence checks never reject a write: every
    /// non-erasure write stores the value, and the outcome only reports
    /// what the bookkeeping did so the caller can log it.
    pub fn apply(
        &mut self,
        origin: ConnectionId,
        source: &str,
        level: PersistenceLevel,
        record: &str,
        value: Value,
    ) -> Applied {
        debug_assert!(level.is_persistent(), "DATA messages never reach the store");

        let key = PersistenceKey::new(source, record);

        // Erasure request: remove the record if present, else ignore
        if value.is_null() {
            return match self.records.remove(&key) {
                Some(old) => {
                    if let Some(owner) = old.owner {
                        Self::forget_owned(&mut self.owned, owner, &key);
                    }
                    // Erasure clears ownership for the origin regardless
                    // of who actually owned the record
                    Self::forget_owned(&mut self.owned, origin, &key);
                    Applied::ErasedExisting
                }
                None => Applied::ErasedNothing,
            };
        }

        let Self {
            records,
            owned,
            next_seq,
        } = self;

        let ownership = match records.get_mut(&key) {
            None => {
                let owner = if level == PersistenceLevel::System {
                    None
                } else {
                    Some(origin)
                };
                records.insert(
                    key.clone(),
                    PersistentRecord {
                        level,
                        value,
                        owner,
                        seq: *next_seq,
                    },
                );
                *next_seq += 1;
                OwnershipChange::Claimed
            }
            Some(existing) => {
                let change = match existing.owner {
                    // SYSTEM record overwritten at a lower level
                    None if level != PersistenceLevel::System => OwnershipChange::Demoted,
                    None => OwnershipChange::Unchanged,
                    Some(prev) if prev != origin => {
                        Self::forget_owned(owned, prev, &key);
                        OwnershipChange::TakenFrom(prev)
                    }
                    Some(_) if level == PersistenceLevel::System => {
                        Self::forget_owned(owned, origin, &key);
                        OwnershipChange::PromotedToSystem
                    }
                    Some(_) => OwnershipChange::Unchanged,
                };

                existing.level = level;
                existing.value = value;
                existing.owner = if level == PersistenceLevel::System {
                    None
                } else {
                    Some(origin)
                };
                change
            }
        };

        // Post-write ownership index: the origin owns every non-SYSTEM
        // record it just wrote
        if level != PersistenceLevel::System {
            owned.entry(origin).or_default().insert(key);
        }

        Applied::Stored { ownership }
    }

    /// Remove every record owned by `conn`, returning the erased keys.
    ///
    /// Called when a connection goes away; the returned keys are
    /// broadcast as erasures to the surviving connections. SYSTEM
    /// records are unowned and survive their writer's disconnect.
    pub fn release(&mut self, conn: ConnectionId) -> Vec<PersistenceKey> {
        let keys = match self.owned.remove(&conn) {
            Some(keys) => keys,
            None => return Vec::new(),
        };

        let mut released: Vec<(u64, PersistenceKey)> = keys
            .into_iter()
            .map(|key| {
                let seq = self
                    .records
                    .remove(&key)
                    .map(|rec| rec.seq)
                    .unwrap_or(u64::MAX);
                (seq, key)
            })
            .collect();

        // Erase in insertion order so peers observe a deterministic stream
        released.sort_by_key(|(seq, _)| *seq);
        released.into_iter().map(|(_, key)| key).collect()
    }

    /// Snapshot of every stored record for replay to a new connection.
    ///
    /// Ordered by descending persistence level (SYSTEM, SOURCE, STATE),
    /// insertion order within a level.
    pub fn snapshot(&self) -> Vec<(String, String, Value)> {
        let mut entries: Vec<(&PersistenceKey, &PersistentRecord)> = self.records.iter().collect();
        entries.sort_by_key(|(_, rec)| (std::cmp::Reverse(rec.level), rec.seq));
        entries
            .into_iter()
            .map(|(key, rec)| (key.source.clone(), key.record.clone(), rec.value.clone()))
            .collect()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a stored record
    pub fn get(&self, key: &PersistenceKey) -> Option<&PersistentRecord> {
        self.records.get(key)
    }

    /// Keys currently owned by `conn`, in insertion order
    pub fn owned_keys(&self, conn: ConnectionId) -> Vec<PersistenceKey> {
        let mut keys: Vec<(u64, PersistenceKey)> = self
            .owned
            .get(&conn)
            .into_iter()
            .flatten()
            .map(|key| {
                let seq = self.records.get(key).map(|rec| rec.seq).unwrap_or(u64::MAX);
                (seq, key.clone())
            })
            .collect();
        keys.sort_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Iterate all stored records
    pub fn iter(&self) -> impl Iterator<Item = (&PersistenceKey, &PersistentRecord)> {
        self.records.iter()
    }

    fn forget_owned(
        owned: &mut HashMap<ConnectionId, HashSet<PersistenceKey>>,
        conn: ConnectionId,
        key: &PersistenceKey,
    ) {
        if let Some(keys) = owned.get_mut(&conn) {
            keys.remove(key);
            if keys.is_empty() {
                owned.remove(&conn);
            }
        }
    }
}
