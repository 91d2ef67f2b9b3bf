//! Shared helpers for integration tests

#![allow(dead_code)]

use std::ops::Range;
use std::path::Path;

use tempfile::TempDir;
use tierdb::{
    AppendCtx, ColumnDef, ColumnType, ColumnVector, Config, Db, Result, RowBatch, Schema,
    Snapshot, SyncStrategy, TableOpCtx, Value,
};

// =============================================================================
// Setup
// =============================================================================

/// 4 rows per block, 2 blocks per segment
pub fn small_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .sync_strategy(SyncStrategy::Never)
        .block_max_rows(4)
        .segment_max_blocks(2)
        .pool_acquire_timeout_ms(200)
        .worker_threads(4)
        .flush_workers(2)
        .build()
}

pub fn setup_temp_db() -> (TempDir, Db) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::open(small_config(temp_dir.path())).unwrap();
    (temp_dir, db)
}

pub fn reopen(dir: &TempDir) -> Db {
    Db::open(small_config(dir.path())).unwrap()
}

/// `id: UInt64, value: Int64`
pub fn test_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("id", ColumnType::UInt64),
        ColumnDef::new("value", ColumnType::Int64),
    ])
}

pub fn create_test_table(db: &Db, name: &str, op_index: u64) {
    db.create_table(test_schema(), TableOpCtx::new(name, op_index))
        .unwrap();
}

/// Rows `ids` with `value = id * 10`
pub fn id_batch(ids: Range<u64>) -> RowBatch {
    let values: Vec<i64> = ids.clone().map(|i| i as i64 * 10).collect();
    RowBatch::new(vec![
        ColumnVector::UInt64(ids.collect()),
        ColumnVector::Int64(values),
    ])
    .unwrap()
}

pub fn append(db: &Db, table: &str, ids: Range<u64>, op_index: u64) {
    db.relation(table)
        .unwrap()
        .write(AppendCtx::new(table, id_batch(ids), op_index))
        .unwrap();
}

// =============================================================================
// Scanning
// =============================================================================

/// Every `id` visible to `snapshot`, in table order
pub fn collect_ids(snapshot: &Snapshot) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let mut segments = snapshot.new_iterator();
    while let Some(segment) = segments.get_handle() {
        let mut blocks = segment.new_iterator();
        while let Some(block) = blocks.get_handle() {
            let mut prefetch = block.prefetch()?;
            let reader = prefetch.get_reader_by_attr(0)?;
            for row in 0..reader.rows() {
                if let Some(Value::UInt64(id)) = reader.get(row) {
                    ids.push(id);
                }
            }
            prefetch.close();
            blocks.next();
        }
        segments.next();
    }
    Ok(ids)
}

/// Block ids visible to `snapshot`, with their row counts
pub fn collect_blocks(snapshot: &Snapshot) -> Vec<(u64, u32)> {
    let mut out = Vec::new();
    let mut segments = snapshot.new_iterator();
    while let Some(segment) = segments.get_handle() {
        let mut blocks = segment.new_iterator();
        while let Some(block) = blocks.get_handle() {
            out.push((block.id(), block.rows()));
            blocks.next();
        }
        segments.next();
    }
    out
}

pub fn scan_ids(db: &Db, table: &str) -> Vec<u64> {
    let snapshot = db
        .get_snapshot(tierdb::GetSnapshotCtx::scan_all(table))
        .unwrap();
    let ids = collect_ids(&snapshot).unwrap();
    snapshot.close();
    ids
}
