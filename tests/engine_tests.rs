//! Tests for Db and the request dispatcher
//!
//! These tests verify:
//! - Opening a data directory and validating config
//! - Operations after close
//! - Dispatching appends and searches, cancel and join
//! - Racing a drop against writes to the same table

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::*;
use tempfile::TempDir;
use tierdb::{
    AppendCtx, Config, Db, Dispatcher, DropTableCtx, GetSnapshotCtx, SegmentIndexPolicy,
    TableOpCtx, TierError,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn open_err(config: Config) -> TierError {
    match Db::open(config) {
        Ok(_) => panic!("open should fail"),
        Err(e) => e,
    }
}

fn setup_dispatcher() -> (TempDir, Arc<Db>, Dispatcher) {
    let (temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let db = Arc::new(db);
    let dispatcher = Dispatcher::start(Arc::clone(&db), 16).unwrap();
    (temp, db, dispatcher)
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_open_creates_directories() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("mydb");

    let db = Db::open(small_config(&data_dir)).unwrap();

    assert!(data_dir.join("tables").exists());
    assert_eq!(db.data_dir(), data_dir.as_path());
}

#[test]
fn test_open_path_uses_defaults() {
    let temp = TempDir::new().unwrap();

    let db = Db::open_path(temp.path()).unwrap();

    assert_eq!(db.config().segment_index_policy, SegmentIndexPolicy::Latest);
    assert!(db.config().block_max_rows > 0);
}

#[test]
fn test_invalid_config_rejected() {
    let temp = TempDir::new().unwrap();

    let zero_rows = Config {
        block_max_rows: 0,
        ..small_config(temp.path())
    };
    assert!(matches!(open_err(zero_rows), TierError::Config(_)));

    let zero_workers = Config {
        flush_workers: 0,
        ..small_config(temp.path())
    };
    assert!(matches!(open_err(zero_workers), TierError::Config(_)));

    let oversized_pool = Config {
        allocator_limit: 1024,
        mutable_pool_capacity: 4096,
        ..small_config(temp.path())
    };
    assert!(matches!(open_err(oversized_pool), TierError::Config(_)));
}

#[test]
fn test_operations_after_close_are_cancelled() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);

    db.close().unwrap();
    db.close().unwrap();

    assert!(matches!(
        db.create_table(test_schema(), TableOpCtx::new("u", 2)),
        Err(TierError::Cancelled(_))
    ));
    assert!(matches!(db.relation("t"), Err(TierError::Cancelled(_))));
    assert!(matches!(
        db.get_snapshot(GetSnapshotCtx::scan_all("t")),
        Err(TierError::Cancelled(_))
    ));
    assert!(matches!(db.flush_table("t"), Err(TierError::Cancelled(_))));
    assert!(!TierError::Cancelled(String::new()).is_retryable());
}

#[test]
fn test_table_ops_advance_sequence() {
    let (_temp, db) = setup_temp_db();

    create_test_table(&db, "t", 10);
    assert_eq!(db.sequence().current(), 10);

    append(&db, "t", 0..2, 12);
    assert_eq!(db.sequence().current(), 12);

    db.drop_table(DropTableCtx::new("t", 15)).unwrap();
    assert_eq!(db.sequence().next(), 16);
}

#[test]
fn test_tables_lists_dropped_too() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "a", 1);
    create_test_table(&db, "b", 2);
    db.drop_table(DropTableCtx::new("a", 3)).unwrap();

    let tables = db.tables();

    assert_eq!(tables.len(), 2);
    assert!(tables[0].is_dropped());
    assert!(!tables[1].is_dropped());
}

// =============================================================================
// Dispatcher
// =============================================================================

#[test]
fn test_dispatch_append_then_search() {
    let (_temp, db, dispatcher) = setup_dispatcher();

    // Each append runs on its own thread, so wait before sending the next op
    for i in 0..4u64 {
        let reply = dispatcher
            .append(AppendCtx::new("t", id_batch(i * 3..i * 3 + 3), i + 2))
            .unwrap();
        reply.recv().unwrap().unwrap();
    }
    assert_eq!(db.relation("t").unwrap().rows(), 12);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reply = dispatcher
        .search(
            GetSnapshotCtx::scan_all("t"),
            Box::new(move |snapshot| {
                sink.lock().unwrap().extend(collect_ids(snapshot)?);
                Ok(())
            }),
        )
        .unwrap();
    reply.recv().unwrap().unwrap();

    let mut ids = seen.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids, (0..12).collect::<Vec<_>>());

    dispatcher.join().unwrap();
}

#[test]
fn test_dispatch_reports_errors() {
    let (_temp, _db, dispatcher) = setup_dispatcher();

    let reply = dispatcher
        .append(AppendCtx::new("missing", id_batch(0..1), 2))
        .unwrap();
    assert!(reply.recv().unwrap().unwrap_err().is_not_found());

    let reply = dispatcher
        .search(
            GetSnapshotCtx::scan_all("t"),
            Box::new(|_| Err(TierError::Storage("scan failed".to_string()))),
        )
        .unwrap();
    assert!(matches!(reply.recv().unwrap(), Err(TierError::Storage(_))));

    let reply = dispatcher
        .search(GetSnapshotCtx::scan_all("missing"), Box::new(|_| Ok(())))
        .unwrap();
    assert!(reply.recv().unwrap().unwrap_err().is_not_found());
}

#[test]
fn test_dispatch_closes_snapshot_after_scan() {
    let (_temp, db, dispatcher) = setup_dispatcher();
    append(&db, "t", 0..3, 2);

    let reply = dispatcher
        .search(GetSnapshotCtx::scan_all("t"), Box::new(|_| Ok(())))
        .unwrap();
    reply.recv().unwrap().unwrap();

    assert_eq!(db.table("t").unwrap().open_snapshots(), 0);
    assert_eq!(db.mutable_pool_summary().pinned, 0);
}

#[test]
fn test_cancelled_dispatcher_rejects_requests() {
    let (_temp, _db, dispatcher) = setup_dispatcher();

    dispatcher.cancel();
    dispatcher.cancel();

    assert!(dispatcher.is_cancelled());
    assert!(matches!(
        dispatcher.append(AppendCtx::new("t", id_batch(0..1), 2)),
        Err(TierError::Cancelled(_))
    ));
    assert!(matches!(
        dispatcher.search(GetSnapshotCtx::scan_all("t"), Box::new(|_| Ok(()))),
        Err(TierError::Cancelled(_))
    ));
    dispatcher.join().unwrap();
    dispatcher.join().unwrap();
}

#[test]
fn test_join_waits_for_dispatched_requests() {
    let (_temp, db, dispatcher) = setup_dispatcher();
    let scans = Arc::new(AtomicU64::new(0));

    let mut appends = Vec::new();
    let mut searches = Vec::new();
    for i in 0..10u64 {
        appends.push(
            dispatcher
                .append(AppendCtx::new("t", id_batch(i * 2..i * 2 + 2), i + 2))
                .unwrap(),
        );
        let counter = Arc::clone(&scans);
        searches.push(
            dispatcher
                .search(
                    GetSnapshotCtx::scan_all("t"),
                    Box::new(move |_| {
                        thread::sleep(Duration::from_millis(5));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                )
                .unwrap(),
        );
    }
    dispatcher.join().unwrap();

    // Whatever was dispatched has replied by now; the rest never will
    let applied = appends
        .iter()
        .filter(|rx| matches!(rx.try_recv(), Ok(Ok(()))))
        .count() as u64;
    let searched = searches
        .iter()
        .filter(|rx| matches!(rx.try_recv(), Ok(Ok(()))))
        .count() as u64;

    assert_eq!(db.relation("t").unwrap().rows(), applied * 2);
    assert_eq!(scans.load(Ordering::SeqCst), searched);
}

#[test]
fn test_interleaved_writers_keep_op_order() {
    let (temp, db, dispatcher) = setup_dispatcher();
    const PER_WRITER: u64 = 20;

    // Writer w submits ops 2 + w, 4 + w, 6 + w, ...; each row id is its op
    let mut accepted: Vec<u64> = thread::scope(|scope| {
        let writers: Vec<_> = (0..2u64)
            .map(|w| {
                let dispatcher = &dispatcher;
                scope.spawn(move || {
                    let mut accepted = Vec::new();
                    for i in 0..PER_WRITER {
                        let op = 2 + 2 * i + w;
                        let reply = dispatcher
                            .append(AppendCtx::new("t", id_batch(op..op + 1), op))
                            .unwrap();
                        match reply.recv().unwrap() {
                            Ok(()) => accepted.push(op),
                            Err(TierError::InvalidOpIndex(_)) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    accepted
                })
            })
            .collect();
        writers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    accepted.sort_unstable();
    let max_op = *accepted.last().unwrap();

    // Accepted ops landed in increasing order, nothing else landed
    assert_eq!(db.relation("t").unwrap().rows(), accepted.len() as u64);
    assert_eq!(scan_ids(&db, "t"), accepted);
    assert_eq!(db.flush_table("t").unwrap(), Some(max_op));

    dispatcher.join().unwrap();
    db.close().unwrap();
    drop(dispatcher);
    drop(db);

    let db = reopen(&temp);
    assert_eq!(scan_ids(&db, "t"), accepted);
    assert_eq!(db.table("t").unwrap().get_segmented_index(), Some(max_op));

    let relation = db.relation("t").unwrap();
    for &op in &accepted {
        let outcome = relation
            .write(AppendCtx::new("t", id_batch(op..op + 1), op))
            .unwrap();
        assert!(outcome.skipped);
    }
    assert_eq!(relation.rows(), accepted.len() as u64);
}

// =============================================================================
// Drop Races
// =============================================================================

#[test]
fn test_drop_races_with_writes() {
    let (_temp, db) = setup_temp_db();
    create_test_table(&db, "t", 1);
    let db = Arc::new(db);
    let relation = db.relation("t").unwrap();
    let table = db.table("t").unwrap();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let mut landed = 0u64;
            for i in 0..200u64 {
                match relation.write(AppendCtx::new("t", id_batch(i..i + 1), db.sequence().next())) {
                    Ok(_) => landed += 1,
                    Err(e) => {
                        assert!(e.is_not_found(), "unexpected error: {}", e);
                        break;
                    }
                }
            }
            landed
        })
    };

    thread::sleep(Duration::from_millis(2));
    db.drop_table(DropTableCtx::new("t", db.sequence().next()))
        .unwrap();
    let landed = writer.join().unwrap();

    assert_eq!(table.rows(), landed);
    assert!(db.get_snapshot(GetSnapshotCtx::scan_all("t")).is_err());
}
