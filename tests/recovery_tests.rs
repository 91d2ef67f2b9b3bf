//! Tests for reopening a database
//!
//! These tests verify:
//! - Tables, rows and watermarks restored from table records
//! - Unflushed rows lost on crash, flushed rows kept
//! - Replay of already durable writes is skipped exactly once
//! - Ops rejected before a crash stay out after it
//! - Id counters and the sequence continue past recovered values
//! - Damaged records and missing block files are reported as Corruption

mod common;

use std::fs;

use common::*;
use tierdb::catalog::{BlockState, SegmentState};
use tierdb::{AppendCtx, Db, DropTableCtx, GetSegmentsCtx, TableOpCtx, TierError};

// =============================================================================
// Helper Functions
// =============================================================================

fn open_err(temp: &tempfile::TempDir) -> TierError {
    match Db::open(small_config(temp.path())) {
        Ok(_) => panic!("open should fail"),
        Err(e) => e,
    }
}

// =============================================================================
// Basic Recovery
// =============================================================================

#[test]
fn test_reopen_restores_flushed_rows() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..3, 2);
    append(&db, "t", 3..6, 3);
    assert_eq!(db.flush_table("t").unwrap(), Some(3));
    drop(db);

    let db = reopen(&temp);
    let relation = db.relation("t").unwrap();

    assert_eq!(relation.rows(), 6);
    assert_eq!(relation.get_segmented_index(), Some(3));
    assert_eq!(scan_ids(&db, "t"), (0..6).collect::<Vec<_>>());

    let stats = db.recovery_stats();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.dropped_tables, 0);
    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.rows, 6);
    assert_eq!(stats.max_index, 3);
}

#[test]
fn test_reopen_empty_directory() {
    let (temp, db) = setup_temp_db();
    drop(db);

    let db = reopen(&temp);

    assert!(db.tables().is_empty());
    assert_eq!(db.recovery_stats().tables, 0);
    assert_eq!(db.sequence().current(), 0);
}

#[test]
fn test_table_without_rows_survives_reopen() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 7);
    drop(db);

    let db = reopen(&temp);

    let table = db.table("t").unwrap();
    assert_eq!(table.create_index(), 7);
    assert_eq!(table.schema(), &test_schema());
    assert_eq!(table.get_segmented_index(), None);
    assert_eq!(db.sequence().current(), 7);
}

#[test]
fn test_unflushed_rows_lost_on_crash() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    // Fills a block, which flushes in the background
    append(&db, "t", 0..4, 2);
    db.wait_flushes().unwrap();
    // Stays in the mutable tier
    append(&db, "t", 4..6, 3);
    drop(db);

    let db = reopen(&temp);

    assert_eq!(db.relation("t").unwrap().rows(), 4);
    assert_eq!(scan_ids(&db, "t"), vec![0, 1, 2, 3]);
    assert_eq!(db.table("t").unwrap().get_segmented_index(), Some(2));
}

#[test]
fn test_close_flushes_before_reopen() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..6, 2);
    db.close().unwrap();
    drop(db);

    let db = reopen(&temp);

    assert_eq!(scan_ids(&db, "t"), (0..6).collect::<Vec<_>>());
    assert_eq!(db.table("t").unwrap().get_segmented_index(), Some(2));
}

#[test]
fn test_recovered_blocks_are_durable() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..10, 2);
    db.flush_table("t").unwrap();
    drop(db);

    let db = reopen(&temp);
    let table = db.table("t").unwrap();

    for block in db.catalog().table_blocks(&table).unwrap() {
        assert_eq!(block.state(), BlockState::Durable);
    }
    let segments = db.get_segment_ids(GetSegmentsCtx::new("t")).unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(
        db.catalog().segment(segments[0]).unwrap().state(),
        SegmentState::Flushed
    );
    // Nothing is cached until a scan loads it
    assert_eq!(db.durable_pool_summary().pages, 0);
    assert_eq!(scan_ids(&db, "t"), (0..10).collect::<Vec<_>>());
    assert_eq!(db.durable_pool_summary().pages, 6);
}

// =============================================================================
// Replay
// =============================================================================

#[test]
fn test_replay_of_durable_write_is_skipped() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..2, 2);
    db.flush_table("t").unwrap();
    drop(db);

    let db = reopen(&temp);
    let relation = db.relation("t").unwrap();

    let outcome = relation
        .write(AppendCtx::new("t", id_batch(0..2), 2))
        .unwrap();
    assert!(outcome.skipped);
    assert_eq!(outcome.rows, 0);

    let outcome = relation
        .write(AppendCtx::new("t", id_batch(2..4), 3))
        .unwrap();
    assert!(!outcome.skipped);
    assert_eq!(scan_ids(&db, "t"), (0..4).collect::<Vec<_>>());
}

#[test]
fn test_spanning_write_replays_exactly_once() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    // Op 3 spills past the first block; only that block becomes durable
    append(&db, "t", 0..3, 2);
    append(&db, "t", 3..6, 3);
    db.wait_flushes().unwrap();
    drop(db);

    let db = reopen(&temp);
    let relation = db.relation("t").unwrap();

    // The row of op 3 inside the durable block is trimmed
    assert_eq!(relation.rows(), 3);
    assert_eq!(relation.get_segmented_index(), Some(2));

    let replay_2 = relation
        .write(AppendCtx::new("t", id_batch(0..3), 2))
        .unwrap();
    let replay_3 = relation
        .write(AppendCtx::new("t", id_batch(3..6), 3))
        .unwrap();

    assert!(replay_2.skipped);
    assert!(!replay_3.skipped);
    assert_eq!(scan_ids(&db, "t"), (0..6).collect::<Vec<_>>());

    assert_eq!(db.flush_table("t").unwrap(), Some(3));
}

#[test]
fn test_rejected_op_stays_out_after_crash() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..8, 5);
    db.wait_flushes().unwrap();
    let err = db
        .relation("t")
        .unwrap()
        .write(AppendCtx::new("t", id_batch(8..9), 3))
        .unwrap_err();
    assert!(matches!(err, TierError::InvalidOpIndex(_)));
    drop(db);

    let db = reopen(&temp);
    let relation = db.relation("t").unwrap();
    assert_eq!(relation.rows(), 8);
    assert_eq!(relation.get_segmented_index(), Some(5));

    let replay = relation
        .write(AppendCtx::new("t", id_batch(8..9), 3))
        .unwrap();
    assert!(replay.skipped);
    let next = relation
        .write(AppendCtx::new("t", id_batch(8..9), 6))
        .unwrap();
    assert!(!next.skipped);
    assert_eq!(scan_ids(&db, "t"), (0..9).collect::<Vec<_>>());
}

#[test]
fn test_recovered_table_orders_ops_above_watermark() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    drop(db);

    let db = reopen(&temp);
    let relation = db.relation("t").unwrap();
    relation
        .write(AppendCtx::new("t", id_batch(4..5), 4))
        .unwrap();

    // Above the recovered watermark the usual ordering applies
    let err = relation
        .write(AppendCtx::new("t", id_batch(5..6), 3))
        .unwrap_err();
    assert!(matches!(err, TierError::InvalidOpIndex(_)));
    // At or below it, replays are still skipped
    assert!(relation
        .write(AppendCtx::new("t", id_batch(0..4), 2))
        .unwrap()
        .skipped);
    assert_eq!(relation.rows(), 5);
}

// =============================================================================
// Drops & Counters
// =============================================================================

#[test]
fn test_dropped_table_recovered_as_dropped() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    let old_id = db.table("t").unwrap().id();
    db.drop_table(DropTableCtx::new("t", 3)).unwrap();
    drop(db);

    let db = reopen(&temp);

    assert!(db.table("t").unwrap_err().is_not_found());
    assert_eq!(db.recovery_stats().dropped_tables, 1);
    let old = db.catalog().reference_table(old_id).unwrap();
    assert!(old.is_dropped());
    assert_eq!(old.get_segmented_index(), Some(3));

    let new_id = db
        .create_table(test_schema(), TableOpCtx::new("t", 4))
        .unwrap();
    assert!(new_id > old_id);
    assert!(scan_ids(&db, "t").is_empty());
}

#[test]
fn test_counters_continue_after_reopen() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "a", 1);
    append(&db, "a", 0..10, 5);
    db.flush_table("a").unwrap();
    let old_blocks: Vec<u64> = db
        .catalog()
        .table_blocks(&db.table("a").unwrap())
        .unwrap()
        .iter()
        .map(|b| b.id())
        .collect();
    drop(db);

    let db = reopen(&temp);
    assert!(db.sequence().current() >= 5);

    create_test_table(&db, "b", db.sequence().next());
    let op = db.sequence().next();
    append(&db, "b", 0..3, op);
    assert_eq!(db.flush_table("b").unwrap(), Some(op));

    let new_blocks = db
        .catalog()
        .table_blocks(&db.table("b").unwrap())
        .unwrap();
    let max_old = old_blocks.iter().max().copied().unwrap_or(0);
    assert!(new_blocks.iter().all(|b| b.id() > max_old));
    assert!(db.table("b").unwrap().id() > db.table("a").unwrap().id());
}

#[test]
fn test_writes_after_reopen_extend_last_segment() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    drop(db);

    let db = reopen(&temp);
    append(&db, "t", 4..6, 3);

    let segments = db.get_segment_ids(GetSegmentsCtx::new("t")).unwrap();
    assert_eq!(segments.len(), 1);
    let segment = db.catalog().segment(segments[0]).unwrap();
    assert_eq!(segment.block_count(), 2);
    assert_eq!(scan_ids(&db, "t"), (0..6).collect::<Vec<_>>());
}

// =============================================================================
// Damaged Files
// =============================================================================

#[test]
fn test_corrupted_table_record_fails_open() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let path = db
        .catalog()
        .layout()
        .table_record_path(db.table("t").unwrap().id());
    drop(db);

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(open_err(&temp), TierError::Corruption(_)));
}

#[test]
fn test_missing_block_file_fails_open() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    let table = db.table("t").unwrap();
    let block = db.catalog().table_blocks(&table).unwrap()[0].clone();
    let path = db
        .catalog()
        .layout()
        .block_path(table.id(), block.segment_id(), block.id());
    drop(db);

    fs::remove_file(&path).unwrap();

    assert!(matches!(open_err(&temp), TierError::Corruption(_)));
}

#[test]
fn test_stale_record_tmp_removed() {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let tmp = db
        .catalog()
        .layout()
        .table_record_tmp_path(db.table("t").unwrap().id());
    drop(db);

    fs::write(&tmp, b"half written").unwrap();

    let db = reopen(&temp);
    assert!(!tmp.exists());
    assert!(db.table("t").is_ok());
}
