//! TierDB Inspect Binary
//!
//! Opens a data directory, recovers it and prints what it holds.

use clap::{Parser, Subcommand};
use tierdb::{Config, Db, GetSnapshotCtx, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// TierDB data directory inspector
#[derive(Parser, Debug)]
#[command(name = "tierdb-inspect")]
#[command(about = "Inspect a TierDB data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tierdb_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tables with row counts and watermarks
    Tables,

    /// List the segments of a table
    Segments {
        /// Table name
        table: String,
    },

    /// Print the rows of a table
    Scan {
        /// Table name
        table: String,

        /// Stop after this many rows
        #[arg(short, long, default_value = "100")]
        limit: u64,
    },

    /// Print recovery, pool and worker statistics
    Stats,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,tierdb=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("TierDB Inspect v{}", tierdb::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let config = Config::builder().data_dir(&args.data_dir).build();
    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&db, args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(db: &Db, command: Command) -> Result<()> {
    match command {
        Command::Tables => {
            println!("{:>6}  {:<24} {:>8} {:>12} {:>10}  status", "id", "name", "columns", "rows", "index");
            for table in db.tables() {
                println!(
                    "{:>6}  {:<24} {:>8} {:>12} {:>10}  {}",
                    table.id(),
                    table.name(),
                    table.schema().len(),
                    table.rows(),
                    format_index(table.get_segmented_index()),
                    if table.is_dropped() { "dropped" } else { "live" }
                );
            }
        }

        Command::Segments { table } => {
            let table = db.table(&table)?;
            let catalog = db.catalog();
            println!("{:>8}  {:<8} {:>7} {:>10} {:>10}", "segment", "state", "blocks", "rows", "index");
            for segment_id in table.segment_ids() {
                let segment = catalog.segment(segment_id)?;
                let blocks = catalog.segment_blocks(&segment)?;
                let rows: u64 = blocks.iter().map(|b| b.rows() as u64).sum();
                println!(
                    "{:>8}  {:<8} {:>7} {:>10} {:>10}",
                    segment_id,
                    segment.state().to_string(),
                    blocks.len(),
                    rows,
                    format_index(catalog.segment_index(segment_id)?)
                );
            }
        }

        Command::Scan { table, limit } => {
            let snapshot = db.get_snapshot(GetSnapshotCtx::scan_all(&table))?;
            let relation = db.table(&table)?;
            let names: Vec<&str> = relation
                .schema()
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect();
            println!("{}", names.join("\t"));

            let mut printed = 0u64;
            let mut segments = snapshot.new_iterator();
            'scan: while let Some(segment) = segments.get_handle() {
                let mut blocks = segment.new_iterator();
                while let Some(block) = blocks.get_handle() {
                    let prefetch = block.prefetch()?;
                    let readers = snapshot
                        .columns()
                        .iter()
                        .map(|&c| prefetch.get_reader_by_attr(c))
                        .collect::<Result<Vec<_>>>()?;
                    for row in 0..block.rows() as usize {
                        if printed >= limit {
                            break 'scan;
                        }
                        let line: Vec<String> = readers
                            .iter()
                            .map(|r| r.get(row).map(|v| format!("{:?}", v)).unwrap_or_default())
                            .collect();
                        println!("{}", line.join("\t"));
                        printed += 1;
                    }
                    blocks.next();
                }
                segments.next();
            }
            snapshot.close();
            println!("({} of {} rows)", printed, snapshot.rows());
        }

        Command::Stats => {
            let recovery = db.recovery_stats();
            println!(
                "recovered: tables={} dropped={} blocks={} rows={} last_index={}",
                recovery.tables, recovery.dropped_tables, recovery.blocks, recovery.rows, recovery.max_index
            );
            println!("{}", db.buffers());
            println!("{}", db.workers_stats_string());
        }
    }
    Ok(())
}

fn format_index(index: Option<u64>) -> String {
    index.map_or_else(|| "-".to_string(), |i| i.to_string())
}
