//! Engine Module
//!
//! `Db` ties the catalog, buffer pools, flush pipeline and worker pool together
//! and is the entry point for clients.
//!
//! ## Responsibilities
//! - Open a data directory and recover tables from their records
//! - Create/drop tables and hand out `Relation`s for appends and id-based reads
//! - Take snapshots for scans
//! - Expose pool and worker diagnostics
//!
//! ## Concurrency Model
//! - Writes to one table serialise on that table's append lock; writes to
//!   different tables never contend
//! - Snapshots take the table's publish lock in shared mode only while
//!   capturing ids and row counts; scans then run lock-free over pinned pages
//! - Flushing runs on its own executor and never blocks writers beyond the
//!   capacity of the mutable pool

use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferManagers, PoolSummary};
use crate::catalog::{BlockState, Catalog, RecoveryStats, SegmentId, Table, TableId};
use crate::config::Config;
use crate::ctx::{AppendCtx, DropTableCtx, GetSegmentsCtx, GetSnapshotCtx, TableOpCtx};
use crate::error::{Result, TierError};
use crate::ops::{Checkpointer, FlushExecutor, Op, OpCtx, Options};
use crate::scheduler::WorkerPool;
use crate::sequence::SequenceGenerator;
use crate::snapshot::{SegmentHandle, Snapshot};
use crate::storage::StorageLayout;
use crate::types::Schema;
use crate::write::{self, WriteOutcome};

/// An open TierDB instance
pub struct Db {
    opts: Arc<Options>,

    /// Scans and table creation
    workers: Arc<WorkerPool>,

    recovery: RecoveryStats,

    closed: AtomicBool,
}

impl Db {
    /// Open or create a database under `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate the config and create the directory skeleton
    /// 2. Rebuild the catalog from table records
    /// 3. Start the sequence generator past every recovered log index
    /// 4. Start the flush executor and the worker pool
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let layout = StorageLayout::new(&config.data_dir, config.sync_strategy);
        let (catalog, recovery) = Catalog::open(&config, layout)?;
        let catalog = Arc::new(catalog);

        let buffers = Arc::new(BufferManagers::new(&config));
        let checkpointer = Arc::new(Checkpointer::new(
            Arc::clone(&catalog),
            Arc::clone(&buffers),
        ));
        let flusher = Arc::new(FlushExecutor::new(
            config.flush_workers,
            config.flush_retry_limit,
        )?);
        let sequence = Arc::new(SequenceGenerator::new(recovery.max_index));
        let workers = Arc::new(WorkerPool::new(
            "worker",
            config.worker_threads,
            config.worker_queue_depth,
        )?);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            tables = recovery.tables,
            last_index = recovery.max_index,
            "Database opened"
        );

        Ok(Self {
            opts: Arc::new(Options {
                config,
                catalog,
                buffers,
                checkpointer,
                flusher,
                sequence,
            }),
            workers,
            recovery,
            closed: AtomicBool::new(false),
        })
    }

    /// Open with default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Tables
    // =========================================================================

    pub fn create_table(&self, schema: Schema, ctx: TableOpCtx) -> Result<TableId> {
        self.check_open()?;
        let id = self.opts.catalog.create_table(schema, &ctx)?;
        self.opts.sequence.advance_past(ctx.op_index);
        Ok(id)
    }

    pub fn drop_table(&self, ctx: DropTableCtx) -> Result<TableId> {
        self.check_open()?;
        let id = self.opts.catalog.drop_table(&ctx)?;
        self.opts.sequence.advance_past(ctx.op_index);
        Ok(id)
    }

    /// Append handle for a live table
    pub fn relation(&self, name: &str) -> Result<Relation> {
        self.check_open()?;
        Ok(Relation::new(
            self.opts.catalog.weak_ref_table_by_name(name)?,
            Arc::clone(&self.opts),
        ))
    }

    /// Live table by name
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.opts.catalog.weak_ref_table_by_name(name)
    }

    /// All tables, dropped ones included
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.opts.catalog.tables()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_snapshot(&self, ctx: GetSnapshotCtx) -> Result<Snapshot> {
        self.check_open()?;
        let table = self.opts.catalog.weak_ref_table_by_name(&ctx.table_name)?;
        Snapshot::capture(
            Arc::clone(&self.opts.catalog),
            Arc::clone(&self.opts.buffers),
            table,
            &ctx,
        )
    }

    /// Published segment ids of a live table, in table order
    pub fn get_segment_ids(&self, ctx: GetSegmentsCtx) -> Result<Vec<SegmentId>> {
        let table = self.opts.catalog.weak_ref_table_by_name(&ctx.table_name)?;
        let _publish = table.publish_read();
        Ok(table.segment_ids())
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Seal the table's active block, checkpoint everything sealed so far and
    /// wait. Returns the table's durability watermark afterwards.
    pub fn flush_table(&self, name: &str) -> Result<Option<u64>> {
        self.check_open()?;
        let table = self.opts.catalog.weak_ref_table_by_name(name)?;
        self.flush_sealed(&table)?;
        self.opts.flusher.wait_idle()?;
        Ok(table.get_segmented_index())
    }

    /// Block until every scheduled flush op (and its retries) has run
    pub fn wait_flushes(&self) -> Result<()> {
        self.opts.flusher.wait_idle()
    }

    /// `Corruption` once the flush pipeline has escalated a fatal error
    pub fn health(&self) -> Result<()> {
        self.opts.flusher.health()
    }

    fn flush_sealed(&self, table: &Table) -> Result<()> {
        write::seal_active(&self.opts.catalog, table)?;

        let ctx = OpCtx::new(Arc::clone(&self.opts));
        let sealed: Vec<_> = self
            .opts
            .catalog
            .table_blocks(table)?
            .into_iter()
            .filter(|b| b.state() == BlockState::Sealed)
            .collect();

        if sealed.is_empty() {
            if table.request_flush() {
                self.opts
                    .flusher
                    .schedule(Op::flush_table(ctx, table.id()))?;
            }
            return Ok(());
        }
        for block in sealed {
            self.opts
                .flusher
                .schedule(Op::flush_block(ctx.clone(), table.id(), block.id()))?;
        }
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn mutable_pool_summary(&self) -> PoolSummary {
        self.opts.buffers.mutable.summary()
    }

    pub fn flushed_pool_summary(&self) -> PoolSummary {
        self.opts.buffers.flushed.summary()
    }

    pub fn durable_pool_summary(&self) -> PoolSummary {
        self.opts.buffers.durable.summary()
    }

    pub fn workers_stats_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.workers);
        let _ = writeln!(out, "{}", self.opts.flusher.pool());
        let _ = write!(out, "{}", self.opts.flusher.stats());
        out
    }

    pub fn buffers(&self) -> &BufferManagers {
        &self.opts.buffers
    }

    pub fn catalog(&self) -> &Catalog {
        &self.opts.catalog
    }

    /// General worker pool (scans, table creation)
    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn sequence(&self) -> &SequenceGenerator {
        &self.opts.sequence
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    pub fn config(&self) -> &Config {
        &self.opts.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.opts.config.data_dir
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Checkpoint every live table and stop the pools
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for table in self.opts.catalog.tables() {
            if table.is_dropped() {
                continue;
            }
            if let Err(e) = self.flush_sealed(&table) {
                tracing::error!(table_id = table.id(), error = %e, "Final flush failed");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.opts.flusher.wait_idle() {
            first_error.get_or_insert(e);
        }

        self.workers.shutdown();
        self.opts.flusher.shutdown();
        tracing::info!(data_dir = %self.opts.config.data_dir.display(), "Database closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TierError::Cancelled("database is closed".to_string()));
        }
        Ok(())
    }
}

impl Drop for Db {
    /// Stops the pools without flushing; unflushed rows are lost as in a crash
    fn drop(&mut self) {
        self.workers.shutdown();
        self.opts.flusher.shutdown();
    }
}

/// Handle bound to one table, for appends and id-based reads
///
/// Reads go through a scan-all snapshot captured by the first `segment` call and
/// kept until `close`. Segments published after that stay invisible to this
/// relation until it is closed and read again.
pub struct Relation {
    table: Arc<Table>,
    opts: Arc<Options>,
    view: Mutex<Option<Snapshot>>,
}

impl Clone for Relation {
    /// The clone starts without a read view of its own
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.table), Arc::clone(&self.opts))
    }
}

impl Relation {
    fn new(table: Arc<Table>, opts: Arc<Options>) -> Self {
        Self {
            table,
            opts,
            view: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TableId {
        self.table.id()
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn schema(&self) -> &Schema {
        self.table.schema()
    }

    /// Append `ctx.data` under `ctx.op_index`
    ///
    /// Acknowledged once the rows are visible; durable once
    /// `get_segmented_index() >= ctx.op_index`.
    pub fn write(&self, ctx: AppendCtx) -> Result<WriteOutcome> {
        if ctx.table_name != self.table.name() {
            return Err(TierError::NotFound(format!(
                "table '{}' (relation is bound to '{}')",
                ctx.table_name,
                self.table.name()
            )));
        }

        let outcome = write::append(
            &self.opts.catalog,
            &self.opts.buffers,
            &self.table,
            &ctx.data,
            ctx.op_index,
        )?;
        self.opts.sequence.advance_past(ctx.op_index);

        let op_ctx = OpCtx::new(Arc::clone(&self.opts));
        for block_id in &outcome.sealed {
            let op = Op::flush_block(op_ctx.clone(), self.table.id(), *block_id);
            if let Err(e) = self.opts.flusher.schedule(op) {
                // Rows are already visible; the block is picked up by a later flush
                tracing::error!(table_id = self.table.id(), block_id, error = %e, "Could not schedule block flush");
            }
        }
        Ok(outcome)
    }

    /// Published rows
    pub fn rows(&self) -> u64 {
        self.table.rows()
    }

    /// Bytes held by column `column` across published rows
    pub fn size(&self, column: usize) -> Result<u64> {
        let def = self.table.schema().columns.get(column).ok_or_else(|| {
            TierError::SchemaMismatch(format!(
                "table '{}' has no column {}",
                self.table.name(),
                column
            ))
        })?;
        Ok(self.table.rows() * def.ty.width() as u64)
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        let _publish = self.table.publish_read();
        self.table.segment_ids()
    }

    pub fn get_segmented_index(&self) -> Option<u64> {
        self.table.get_segmented_index()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Segment `id` of this relation's read view
    pub fn segment(&self, id: SegmentId) -> Result<SegmentHandle> {
        let mut view = self.view.lock();
        if view.is_none() {
            if self.table.is_dropped() {
                return Err(TierError::NotFound(format!(
                    "table '{}' (dropped)",
                    self.table.name()
                )));
            }
            *view = Some(Snapshot::capture(
                Arc::clone(&self.opts.catalog),
                Arc::clone(&self.opts.buffers),
                Arc::clone(&self.table),
                &GetSnapshotCtx::scan_all(self.table.name()),
            )?);
        }
        match view.as_ref() {
            Some(snapshot) => snapshot.segment(id),
            None => Err(TierError::Cancelled(format!(
                "relation '{}' has no read view",
                self.table.name()
            ))),
        }
    }

    /// Release the read view. Handles taken from it stop prefetching; pages
    /// already prefetched stay pinned until their `PrefetchHandle` closes.
    /// Idempotent.
    pub fn close(&self) {
        if let Some(snapshot) = self.view.lock().take() {
            snapshot.close();
            tracing::trace!(table_id = self.table.id(), "Relation read view closed");
        }
    }
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("id", &self.table.id())
            .field("name", &self.table.name())
            .field("rows", &self.table.rows())
            .finish()
    }
}
