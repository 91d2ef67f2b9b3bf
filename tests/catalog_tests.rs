//! Tests for the metadata catalog
//!
//! These tests verify:
//! - Table creation, duplicate detection and name reuse after drop
//! - Strong vs weak table lookups around drops
//! - Segmented index and segment aggregation policies
//! - Concurrent creation

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use tierdb::catalog::BlockState;
use tierdb::{
    AppendCtx, ColumnDef, ColumnType, Db, DropTableCtx, GetSegmentsCtx, Schema, SegmentIndexPolicy,
    TableOpCtx, TierError,
};

// =============================================================================
// Create / Drop
// =============================================================================

#[test]
fn test_create_table_assigns_distinct_ids() {
    let (_temp, db) = setup_temp_db();

    let a = db.create_table(test_schema(), TableOpCtx::new("a", 1)).unwrap();
    let b = db.create_table(test_schema(), TableOpCtx::new("b", 2)).unwrap();

    assert_ne!(a, b);
    assert_eq!(db.table("a").unwrap().id(), a);
    assert_eq!(db.table("b").unwrap().id(), b);
    assert_eq!(db.table("a").unwrap().create_index(), 1);
}

#[test]
fn test_create_duplicate_name_fails() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "events", 1);

    let err = db
        .create_table(test_schema(), TableOpCtx::new("events", 2))
        .unwrap_err();

    assert!(matches!(err, TierError::AlreadyExists(_)));
    assert_eq!(db.tables().len(), 1);
}

#[test]
fn test_create_rejects_invalid_schema() {
    let (_temp, db) = setup_temp_db();

    let empty = db.create_table(Schema::new(vec![]), TableOpCtx::new("t", 1));
    assert!(matches!(empty, Err(TierError::SchemaMismatch(_))));

    let duplicate = Schema::new(vec![
        ColumnDef::new("x", ColumnType::Int32),
        ColumnDef::new("x", ColumnType::Int64),
    ]);
    let dup = db.create_table(duplicate, TableOpCtx::new("t", 2));
    assert!(matches!(dup, Err(TierError::SchemaMismatch(_))));

    // A rejected create does not reserve the name
    create_test_table(&db, "t", 3);
}

#[test]
fn test_drop_unknown_table_fails() {
    let (_temp, db) = setup_temp_db();

    let err = db.drop_table(DropTableCtx::new("missing", 1)).unwrap_err();

    assert!(err.is_not_found());
}

#[test]
fn test_drop_hides_table_from_weak_lookups() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let id = db.table("t").unwrap().id();

    assert_eq!(db.drop_table(DropTableCtx::new("t", 2)).unwrap(), id);

    assert!(db.table("t").unwrap_err().is_not_found());
    assert!(db.relation("t").is_err());
    assert!(db.catalog().weak_ref_table(id).unwrap_err().is_not_found());

    // Strong references still resolve and carry the tombstone
    let table = db.catalog().reference_table(id).unwrap();
    assert!(table.is_dropped());
    assert_eq!(table.drop_index(), Some(2));
}

#[test]
fn test_drop_twice_fails() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);

    db.drop_table(DropTableCtx::new("t", 2)).unwrap();
    let err = db.drop_table(DropTableCtx::new("t", 3)).unwrap_err();

    assert!(err.is_not_found());
}

#[test]
fn test_name_reusable_after_drop() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..3, 2);
    let old = db.drop_table(DropTableCtx::new("t", 3)).unwrap();

    let new = db.create_table(test_schema(), TableOpCtx::new("t", 4)).unwrap();

    assert_ne!(old, new);
    assert_eq!(db.relation("t").unwrap().rows(), 0);
    assert_eq!(db.catalog().reference_table(old).unwrap().rows(), 3);
}

// =============================================================================
// Segmented Index
// =============================================================================

#[test]
fn test_segmented_index_none_before_checkpoint() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..2, 2);

    assert_eq!(db.table("t").unwrap().get_segmented_index(), None);
}

#[test]
fn test_segmented_index_jumps_to_drop_index() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    let table = db.table("t").unwrap();
    assert_eq!(table.get_segmented_index(), Some(2));

    db.drop_table(DropTableCtx::new("t", 10)).unwrap();

    assert_eq!(table.get_segmented_index(), Some(10));
    assert_eq!(table.durable_index(), Some(2));
}

fn applied_indices(db: &Db, table: &str) -> Vec<Option<u64>> {
    let table = db.table(table).unwrap();
    db.catalog()
        .table_blocks(&table)
        .unwrap()
        .iter()
        .map(|b| b.applied_index())
        .collect()
}

#[test]
fn test_segment_policy_latest() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 3);
    append(&db, "t", 4..6, 5);

    let segments = db.get_segment_ids(GetSegmentsCtx::new("t")).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(applied_indices(&db, "t"), vec![Some(3), Some(5)]);
    assert_eq!(db.catalog().policy(), SegmentIndexPolicy::Latest);
    assert_eq!(db.catalog().segment_index(segments[0]).unwrap(), Some(5));
}

#[test]
fn test_segment_policy_minimum() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = small_config(temp.path());
    config.segment_index_policy = SegmentIndexPolicy::Minimum;
    let db = Db::open(config).unwrap();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 3);
    append(&db, "t", 4..6, 5);

    let segments = db.get_segment_ids(GetSegmentsCtx::new("t")).unwrap();
    assert_eq!(db.catalog().segment_index(segments[0]).unwrap(), Some(3));
}

#[test]
fn test_applied_index_never_decreases() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);

    append(&db, "t", 0..1, 7);
    let err = db
        .relation("t")
        .unwrap()
        .write(AppendCtx::new("t", id_batch(1..2), 4))
        .unwrap_err();

    // The older op never reaches the block
    assert!(matches!(err, TierError::InvalidOpIndex(_)));
    assert_eq!(applied_indices(&db, "t"), vec![Some(7)]);
    let block = db.catalog().table_blocks(&db.table("t").unwrap()).unwrap()[0].clone();
    assert_eq!(block.rows(), 1);
    assert_eq!(block.state(), BlockState::Mutable);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_create_distinct_names() {
    let (_temp, db) = setup_temp_db();
    let db = Arc::new(db);
    let barrier = Arc::new(Barrier::new(100));

    let handles: Vec<_> = (0..100u64)
        .map(|i| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.create_table(test_schema(), TableOpCtx::new(format!("t{}", i), i + 1))
            })
        })
        .collect();

    let mut ids: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), 100);
    for i in 0..100 {
        let table = db.table(&format!("t{}", i)).unwrap();
        assert_eq!(table.name(), format!("t{}", i));
    }
}

#[test]
fn test_concurrent_create_duplicate_names() {
    let (_temp, db) = setup_temp_db();
    let db = Arc::new(db);
    let barrier = Arc::new(Barrier::new(100));

    // Every name is requested twice
    let handles: Vec<_> = (0..100u64)
        .map(|i| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.create_table(test_schema(), TableOpCtx::new(format!("t{}", i % 50), i + 1))
            })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => created += 1,
            Err(TierError::AlreadyExists(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(created, 50);
    assert_eq!(duplicates, 50);
    assert_eq!(db.tables().len(), 50);
}
