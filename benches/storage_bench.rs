//! Benchmarks for TierDB append and scan paths

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;
use tierdb::{
    AppendCtx, ColumnDef, ColumnType, ColumnVector, Config, Db, GetSnapshotCtx, RowBatch,
    Schema, TableOpCtx,
};

const BATCH_ROWS: usize = 1024;

fn open_db(dir: &TempDir) -> Db {
    let config = Config::builder()
        .data_dir(dir.path())
        .block_max_rows(8192)
        .segment_max_blocks(16)
        .build();
    let db = Db::open(config).unwrap();
    let schema = Schema::new(vec![
        ColumnDef::new("id", ColumnType::UInt64),
        ColumnDef::new("value", ColumnType::Float64),
    ]);
    db.create_table(schema, TableOpCtx::new("bench", 1)).unwrap();
    db
}

fn batch(start: u64) -> RowBatch {
    let ids: Vec<u64> = (start..start + BATCH_ROWS as u64).collect();
    let values: Vec<f64> = ids.iter().map(|i| *i as f64 * 0.5).collect();
    RowBatch::new(vec![ColumnVector::UInt64(ids), ColumnVector::Float64(values)]).unwrap()
}

fn append_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(BATCH_ROWS as u64));

    group.bench_function("batch_1024", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let relation = db.relation("bench").unwrap();
        let mut op_index = 1u64;
        b.iter_batched(
            || {
                op_index += 1;
                AppendCtx::new("bench", batch(op_index * BATCH_ROWS as u64), op_index)
            },
            |ctx| relation.write(ctx).unwrap(),
            BatchSize::SmallInput,
        );
        db.close().unwrap();
    });

    group.finish();
}

fn scan_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let relation = db.relation("bench").unwrap();
    for i in 0..64u64 {
        relation
            .write(AppendCtx::new("bench", batch(i * BATCH_ROWS as u64), i + 2))
            .unwrap();
    }
    db.flush_table("bench").unwrap();

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(64 * BATCH_ROWS as u64));

    group.bench_function("sum_column", |b| {
        b.iter(|| {
            let snapshot = db.get_snapshot(GetSnapshotCtx::scan_all("bench").with_columns(vec![1])).unwrap();
            let mut sum = 0.0;
            let mut segments = snapshot.new_iterator();
            while let Some(segment) = segments.get_handle() {
                let mut blocks = segment.new_iterator();
                while let Some(block) = blocks.get_handle() {
                    let prefetch = block.prefetch().unwrap();
                    if let ColumnVector::Float64(values) =
                        prefetch.get_reader_by_attr(1).unwrap().to_vector().unwrap()
                    {
                        sum += values.iter().sum::<f64>();
                    }
                    blocks.next();
                }
                segments.next();
            }
            snapshot.close();
            sum
        })
    });

    group.finish();
    db.close().unwrap();
}

criterion_group!(benches, append_benchmarks, scan_benchmarks);
criterion_main!(benches);
