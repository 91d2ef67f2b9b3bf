//! Tests for the checkpoint / flush pipeline
//!
//! These tests verify:
//! - Block files and table records written by a checkpoint
//! - Watermark advancing monotonically with durable writes
//! - Block and segment states after a checkpoint
//! - Corruption escalating to a fatal executor state

mod common;

use std::fs;

use common::*;
use tierdb::catalog::{BlockState, SegmentState, TableRecord};
use tierdb::storage::{read_record, BlockFileReader};
use tierdb::{DropTableCtx, GetSegmentsCtx, TierError};

// =============================================================================
// Checkpoint Output
// =============================================================================

#[test]
fn test_flush_table_returns_watermark() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..2, 2);
    append(&db, "t", 2..4, 3);
    append(&db, "t", 4..6, 4);

    assert_eq!(db.flush_table("t").unwrap(), Some(4));

    let table = db.table("t").unwrap();
    for block in db.catalog().table_blocks(&table).unwrap() {
        assert_eq!(block.state(), BlockState::Durable);
    }
    assert_eq!(scan_ids(&db, "t"), (0..6).collect::<Vec<_>>());
}

#[test]
fn test_flush_empty_table() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);

    assert_eq!(db.flush_table("t").unwrap(), None);
    assert_eq!(db.flush_table("t").unwrap(), None);
}

#[test]
fn test_flush_unknown_table() {
    let (_temp, db) = setup_temp_db();

    assert!(db.flush_table("missing").unwrap_err().is_not_found());
}

#[test]
fn test_checkpoint_writes_block_files_and_record() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..6, 2);
    db.flush_table("t").unwrap();

    let table = db.table("t").unwrap();
    let layout = db.catalog().layout();

    let blocks = db.catalog().table_blocks(&table).unwrap();
    for block in &blocks {
        let path = layout.block_path(table.id(), block.segment_id(), block.id());
        let mut reader = BlockFileReader::open(&path).unwrap();
        assert_eq!(reader.meta().block_id, block.id());
        assert_eq!(reader.meta().rows, block.rows());
        assert_eq!(reader.column_count(), 2);
        assert_eq!(reader.read_column(0).unwrap().len(), block.rows() as usize * 8);
        assert!(!layout
            .block_tmp_path(table.id(), block.segment_id(), block.id())
            .exists());
    }

    let record: TableRecord = read_record(&layout.table_record_path(table.id())).unwrap();
    assert_eq!(record.name, "t");
    assert_eq!(record.durable_index, Some(2));
    assert_eq!(record.blocks().count(), blocks.len());
    assert!(!layout.table_record_tmp_path(table.id()).exists());
}

#[test]
fn test_full_segment_becomes_flushed() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..10, 2);
    db.flush_table("t").unwrap();

    let segments = db.get_segment_ids(GetSegmentsCtx::new("t")).unwrap();
    let first = db.catalog().segment(segments[0]).unwrap();
    let second = db.catalog().segment(segments[1]).unwrap();

    assert_eq!(first.state(), SegmentState::Flushed);
    // Not full yet, so it keeps accepting blocks
    assert_eq!(second.state(), SegmentState::Active);
}

#[test]
fn test_writes_continue_after_checkpoint() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..2, 2);
    db.flush_table("t").unwrap();

    append(&db, "t", 2..5, 3);

    assert_eq!(scan_ids(&db, "t"), (0..5).collect::<Vec<_>>());
    assert_eq!(db.flush_table("t").unwrap(), Some(3));
}

// =============================================================================
// Watermark
// =============================================================================

#[test]
fn test_watermark_is_monotonic() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let relation = db.relation("t").unwrap();

    let mut observed = Vec::new();
    let mut last_op = 0;
    for i in 0..12u64 {
        last_op = db.sequence().next();
        append(&db, "t", i * 3..i * 3 + 3, last_op);
        if i % 4 == 3 {
            db.flush_table("t").unwrap();
        }
        observed.push(relation.get_segmented_index().unwrap_or(0));
    }
    db.wait_flushes().unwrap();
    observed.push(relation.get_segmented_index().unwrap_or(0));

    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(db.flush_table("t").unwrap(), Some(last_op));
}

#[test]
fn test_watermark_waits_for_spanning_write() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);

    // Op 2 fills the first block; op 3 spills into the second
    append(&db, "t", 0..3, 2);
    append(&db, "t", 3..6, 3);
    db.wait_flushes().unwrap();

    // Only the first block is durable; op 3 is not complete on disk
    let table = db.table("t").unwrap();
    let blocks = db.catalog().table_blocks(&table).unwrap();
    assert_eq!(blocks[0].state(), BlockState::Durable);
    assert_eq!(blocks[1].state(), BlockState::Mutable);
    assert_eq!(table.get_segmented_index(), Some(2));

    assert_eq!(db.flush_table("t").unwrap(), Some(3));
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_missing_page_escalates_to_fatal() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    create_test_table(&db, "other", 2);
    append(&db, "t", 0..3, 3);

    let table = db.table("t").unwrap();
    let block = db.catalog().table_blocks(&table).unwrap()[0].clone();
    db.buffers().mutable.remove(block.page_keys()[0]);

    let err = db.flush_table("t").unwrap_err();
    assert!(matches!(err, TierError::Corruption(_)));
    assert!(matches!(db.health(), Err(TierError::Corruption(_))));
    assert!(db.workers_stats_string().contains("fatal=true"));

    // New flushes are refused, appends still land in memory
    append(&db, "other", 0..2, 4);
    let err = db.flush_table("other").unwrap_err();
    assert!(matches!(err, TierError::Corruption(_)));
    assert_eq!(db.relation("other").unwrap().rows(), 2);
    assert_eq!(db.table("other").unwrap().get_segmented_index(), None);
}

#[test]
fn test_stats_after_clean_flushes() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..8, 2);
    db.flush_table("t").unwrap();

    db.health().unwrap();
    let stats = db.workers_stats_string();
    assert!(stats.contains("worker<"));
    assert!(stats.contains("flush<"));
    assert!(stats.contains("fatal=false"));
    assert!(stats.contains("abandoned=0"));
}

#[test]
fn test_dropped_table_keeps_files() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    append(&db, "t", 0..4, 2);
    db.flush_table("t").unwrap();
    let table = db.table("t").unwrap();
    let blocks = db.catalog().table_blocks(&table).unwrap();

    db.drop_table(DropTableCtx::new("t", 3)).unwrap();

    let layout = db.catalog().layout();
    for block in blocks {
        assert!(layout
            .block_path(table.id(), block.segment_id(), block.id())
            .exists());
    }
    let record: TableRecord = read_record(&layout.table_record_path(table.id())).unwrap();
    assert_eq!(record.drop_index, Some(3));
    assert_eq!(record.durable_index, Some(2));
    assert_eq!(fs::read_dir(layout.table_dir(table.id())).unwrap().count(), 2);
}
