//! Persistence Store Tests
//!
//! Tests for the ownership state machine:
//! - Insert, overwrite, erasure
//! - Demotion, transfer, promotion transitions
//! - Ownership index consistency
//! - Snapshot ordering and disconnect release

use acqbus::protocol::{PersistenceLevel, Value};
use acqbus::store::{Applied, OwnershipChange, PersistenceKey, PersistenceStore};

// =============================================================================
// Helper Functions
// =============================================================================

const CONN_A: u64 = 1;
const CONN_B: u64 = 2;

fn key(source: &str, record: &str) -> PersistenceKey {
    PersistenceKey::new(source, record)
}

/// Every record's owner must appear in the ownership index and vice versa
fn assert_index_consistent(store: &PersistenceStore) {
    for (record_key, record) in store.iter() {
        match record.owner {
            Some(owner) => assert!(
                store.owned_keys(owner).contains(record_key),
                "owner index missing {}",
                record_key
            ),
            None => {
                assert_eq!(record.level, PersistenceLevel::System);
            }
        }
    }
    for conn in [CONN_A, CONN_B] {
        for owned in store.owned_keys(conn) {
            let record = store.get(&owned).expect("indexed key must be stored");
            assert_eq!(record.owner, Some(conn), "stale index entry for {}", owned);
        }
    }
}

// =============================================================================
// Insert Tests
// =============================================================================

#[test]
fn test_insert_state_record_claims_ownership() {
    let mut store = PersistenceStore::new();
    let applied = store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));

    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Claimed
        }
    );
    let record = store.get(&key("inst", "r1")).unwrap();
    assert_eq!(record.level, PersistenceLevel::State);
    assert_eq!(record.value, Value::Int(1));
    assert_eq!(record.owner, Some(CONN_A));
    assert_eq!(store.owned_keys(CONN_A), vec![key("inst", "r1")]);
    assert_index_consistent(&store);
}

#[test]
fn test_insert_system_record_is_unowned() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::System, "site", Value::Int(7));

    let record = store.get(&key("inst", "site")).unwrap();
    assert_eq!(record.owner, None);
    assert!(store.owned_keys(CONN_A).is_empty());
    assert_index_consistent(&store);
}

#[test]
fn test_keys_are_case_sensitive() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));
    store.apply(CONN_A, "inst", PersistenceLevel::State, "R1", Value::Int(2));

    assert_eq!(store.len(), 2);
    assert_eq!(store.get(&key("inst", "r1")).unwrap().value, Value::Int(1));
    assert_eq!(store.get(&key("inst", "R1")).unwrap().value, Value::Int(2));
}

// =============================================================================
// Overwrite / Transition Tests
// =============================================================================

#[test]
fn test_overwrite_by_owner_keeps_ownership() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));
    let applied = store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(2));

    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Unchanged
        }
    );
    assert_eq!(store.get(&key("inst", "r1")).unwrap().value, Value::Int(2));
    assert_index_consistent(&store);
}

#[test]
fn test_ownership_transfer_between_connections() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Float(1.0));

    // Another connection writes under the same key: the write succeeds
    // and ownership moves
    let applied = store.apply(CONN_B, "inst", PersistenceLevel::State, "r1", Value::Float(2.0));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::TakenFrom(CONN_A)
        }
    );

    let record = store.get(&key("inst", "r1")).unwrap();
    assert_eq!(record.value, Value::Float(2.0));
    assert_eq!(record.owner, Some(CONN_B));
    assert!(store.owned_keys(CONN_A).is_empty());
    assert_eq!(store.owned_keys(CONN_B), vec![key("inst", "r1")]);
    assert_index_consistent(&store);
}

#[test]
fn test_demotion_of_system_record() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::System, "r1", Value::Int(1));

    // Overwriting a SYSTEM record at a lower level is permitted, not blocked
    let applied = store.apply(CONN_B, "inst", PersistenceLevel::State, "r1", Value::Int(2));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Demoted
        }
    );

    let record = store.get(&key("inst", "r1")).unwrap();
    assert_eq!(record.level, PersistenceLevel::State);
    assert_eq!(record.owner, Some(CONN_B));
    assert_eq!(store.owned_keys(CONN_B), vec![key("inst", "r1")]);
    assert_index_consistent(&store);
}

#[test]
fn test_promotion_to_system_releases_ownership() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));

    let applied = store.apply(CONN_A, "inst", PersistenceLevel::System, "r1", Value::Int(2));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::PromotedToSystem
        }
    );

    let record = store.get(&key("inst", "r1")).unwrap();
    assert_eq!(record.level, PersistenceLevel::System);
    assert_eq!(record.owner, None);
    assert!(store.owned_keys(CONN_A).is_empty());
    assert_index_consistent(&store);
}

#[test]
fn test_system_overwrite_stays_unowned() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::System, "r1", Value::Int(1));
    let applied = store.apply(CONN_B, "inst", PersistenceLevel::System, "r1", Value::Int(2));

    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Unchanged
        }
    );
    assert_eq!(store.get(&key("inst", "r1")).unwrap().owner, None);
    assert_index_consistent(&store);
}

// =============================================================================
// Erasure Tests
// =============================================================================

#[test]
fn test_erase_absent_key_is_ignored() {
    let mut store = PersistenceStore::new();
    let applied = store.apply(CONN_A, "inst", PersistenceLevel::State, "ghost", Value::Null);
    assert_eq!(applied, Applied::ErasedNothing);
    assert!(store.is_empty());
}

#[test]
fn test_erase_removes_record_and_ownership() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));

    let applied = store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Null);
    assert_eq!(applied, Applied::ErasedExisting);
    assert!(store.get(&key("inst", "r1")).is_none());
    assert!(store.owned_keys(CONN_A).is_empty());

    // Second erasure of the same key is a no-op
    let applied = store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Null);
    assert_eq!(applied, Applied::ErasedNothing);
    assert_index_consistent(&store);
}

#[test]
fn test_erase_by_non_owner_still_removes() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));

    // A different connection sharing the source string erases the key:
    // the record goes away and the old owner's index is cleared
    let applied = store.apply(CONN_B, "inst", PersistenceLevel::State, "r1", Value::Null);
    assert_eq!(applied, Applied::ErasedExisting);
    assert!(store.is_empty());
    assert!(store.owned_keys(CONN_A).is_empty());
    assert!(store.owned_keys(CONN_B).is_empty());
}

#[test]
fn test_erased_record_reinserts_fresh() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::Source, "r1", Value::Int(1));
    store.apply(CONN_A, "inst", PersistenceLevel::Source, "r1", Value::Null);

    let applied = store.apply(CONN_B, "inst", PersistenceLevel::State, "r1", Value::Int(2));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Claimed
        }
    );
    assert_eq!(store.get(&key("inst", "r1")).unwrap().owner, Some(CONN_B));
}

// =============================================================================
// Release (Disconnect) Tests
// =============================================================================

#[test]
fn test_release_erases_owned_records_only() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));
    store.apply(CONN_A, "inst", PersistenceLevel::Source, "r2", Value::Int(2));
    store.apply(CONN_A, "inst", PersistenceLevel::System, "site", Value::Int(3));
    store.apply(CONN_B, "other", PersistenceLevel::State, "r3", Value::Int(4));

    let released = store.release(CONN_A);
    assert_eq!(released, vec![key("inst", "r1"), key("inst", "r2")]);

    // SYSTEM record and the other connection's record survive
    assert_eq!(store.len(), 2);
    assert!(store.get(&key("inst", "site")).is_some());
    assert!(store.get(&key("other", "r3")).is_some());
    assert_index_consistent(&store);
}

#[test]
fn test_release_with_nothing_owned() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::System, "site", Value::Int(1));
    assert!(store.release(CONN_A).is_empty());
    assert_eq!(store.len(), 1);
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_snapshot_orders_by_descending_level() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "st", Value::Int(1));
    store.apply(CONN_A, "inst", PersistenceLevel::Source, "src", Value::Int(2));
    store.apply(CONN_A, "inst", PersistenceLevel::System, "sys", Value::Int(3));

    let snapshot = store.snapshot();
    let records: Vec<&str> = snapshot.iter().map(|(_, record, _)| record.as_str()).collect();
    assert_eq!(records, vec!["sys", "src", "st"]);
}

#[test]
fn test_snapshot_insertion_order_within_level() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "a", PersistenceLevel::State, "first", Value::Int(1));
    store.apply(CONN_B, "b", PersistenceLevel::State, "second", Value::Int(2));
    store.apply(CONN_A, "a", PersistenceLevel::State, "third", Value::Int(3));

    let snapshot = store.snapshot();
    let records: Vec<&str> = snapshot.iter().map(|(_, record, _)| record.as_str()).collect();
    assert_eq!(records, vec!["first", "second", "third"]);
}

#[test]
fn test_snapshot_contains_each_record_once() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(1));
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r1", Value::Int(2));
    store.apply(CONN_A, "inst", PersistenceLevel::Source, "r2", Value::Int(3));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot[0],
        ("inst".to_string(), "r2".to_string(), Value::Int(3))
    );
    assert_eq!(
        snapshot[1],
        ("inst".to_string(), "r1".to_string(), Value::Int(2))
    );
}

#[test]
fn test_snapshot_reflects_level_changes() {
    let mut store = PersistenceStore::new();
    store.apply(CONN_A, "inst", PersistenceLevel::State, "moved", Value::Int(1));
    store.apply(CONN_A, "other", PersistenceLevel::System, "sys", Value::Int(2));

    // Promote the STATE record; it must now replay first among equals
    store.apply(CONN_A, "inst", PersistenceLevel::System, "moved", Value::Int(3));

    let snapshot = store.snapshot();
    let records: Vec<&str> = snapshot.iter().map(|(_, record, _)| record.as_str()).collect();
    assert_eq!(records, vec!["moved", "sys"]);
}

// =============================================================================
// Full Lifecycle Test
// =============================================================================

/// The complete promotion/demotion/transfer chain: STATE, disconnect,
/// STATE again, promote to SOURCE, promote to SYSTEM, owner disconnects
/// (record survives), fresh connection takes ownership back with STATE.
#[test]
fn test_persistence_level_chain() {
    let mut store = PersistenceStore::new();

    // STATE write then disconnect: record erased
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r", Value::Int(1));
    assert_eq!(store.release(CONN_A), vec![key("inst", "r")]);
    assert!(store.is_empty());

    // Reconnect and overwrite through the levels
    store.apply(CONN_A, "inst", PersistenceLevel::State, "r", Value::Int(2));
    assert_eq!(store.snapshot()[0].2, Value::Int(2));

    let applied = store.apply(CONN_A, "inst", PersistenceLevel::Source, "r", Value::Int(3));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Unchanged
        }
    );
    assert_eq!(store.snapshot()[0].2, Value::Int(3));

    let applied = store.apply(CONN_A, "inst", PersistenceLevel::System, "r", Value::Int(4));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::PromotedToSystem
        }
    );

    // Owner disconnects; the record is global now and survives
    assert!(store.release(CONN_A).is_empty());
    assert_eq!(store.snapshot()[0].2, Value::Int(4));

    // A fresh connection takes ownership back
    let applied = store.apply(CONN_B, "inst", PersistenceLevel::State, "r", Value::Int(5));
    assert_eq!(
        applied,
        Applied::Stored {
            ownership: OwnershipChange::Demoted
        }
    );
    assert_eq!(store.snapshot()[0].2, Value::Int(5));
    assert_eq!(store.owned_keys(CONN_B), vec![key("inst", "r")]);

    // And its disconnect erases the record
    assert_eq!(store.release(CONN_B), vec![key("inst", "r")]);
    assert!(store.is_empty());
    assert_index_consistent(&store);
}
