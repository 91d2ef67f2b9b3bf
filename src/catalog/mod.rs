//! Metadata Catalog
//!
//! Table → Segment → Block hierarchy kept in an id-keyed arena.
//!
//! ## Responsibilities
//! - Create, drop and resolve tables by id or name
//! - Own every Segment and Block; children point back by id, never by reference
//! - Persist one table record per table and rebuild the arena from them on open
//!
//! ## Concurrency
//! - `names`: the only shared critical section of `create_table`; held for the
//!   duplicate check and id reservation, never across I/O
//! - `tables`, `segments`, `blocks`: RwLock maps, read-mostly
//! - Id counters are atomics
//!
//! ```text
//!   names ──► TableId ──► Table { segments: [SegmentId] }
//!                                     │
//!                         Segment { blocks: [BlockId], table_id }
//!                                     │
//!                         Block { rows, index, state, segment_id }
//! ```

mod block;
mod record;
mod segment;
mod table;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, SegmentIndexPolicy};
use crate::ctx::{DropTableCtx, TableOpCtx};
use crate::error::{Result, TierError};
use crate::storage::{read_record, write_record, StorageLayout};
use crate::types::Schema;

pub use block::{Block, BlockId, BlockIndex, BlockState};
pub use record::{recoverable_rows, BlockRecord, SegmentRecord, TableRecord};
pub use segment::{Segment, SegmentId, SegmentState};
pub use table::{Table, TableId};

/// What `Catalog::open` found on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub tables: usize,
    pub dropped_tables: usize,
    pub blocks: usize,
    pub rows: u64,
    /// Highest log index found in any record
    pub max_index: u64,
}

/// The metadata arena
pub struct Catalog {
    layout: StorageLayout,
    block_max_rows: u32,
    segment_max_blocks: u32,
    policy: SegmentIndexPolicy,

    names: Mutex<HashMap<String, TableId>>,
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
    segments: RwLock<HashMap<SegmentId, Arc<Segment>>>,
    blocks: RwLock<HashMap<BlockId, Arc<Block>>>,

    next_table_id: AtomicU64,
    next_segment_id: AtomicU64,
    next_block_id: AtomicU64,
}

impl Catalog {
    /// Empty catalog (nothing read from disk)
    pub fn new(config: &Config, layout: StorageLayout) -> Self {
        Self {
            layout,
            block_max_rows: config.block_max_rows,
            segment_max_blocks: config.segment_max_blocks,
            policy: config.segment_index_policy,
            names: Mutex::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            segments: RwLock::new(HashMap::new()),
            blocks: RwLock::new(HashMap::new()),
            next_table_id: AtomicU64::new(1),
            next_segment_id: AtomicU64::new(1),
            next_block_id: AtomicU64::new(1),
        }
    }

    /// Rebuild the catalog from the table records under `layout`
    ///
    /// On startup:
    /// 1. Discover table directories
    /// 2. Read and verify each table record
    /// 3. Restore the durable block prefix, trimmed to completed writes
    /// 4. Advance id counters past everything seen
    pub fn open(config: &Config, layout: StorageLayout) -> Result<(Self, RecoveryStats)> {
        layout.create()?;
        let catalog = Self::new(config, layout);
        let mut stats = RecoveryStats::default();

        let mut max_table = 0;
        let mut max_segment = 0;
        let mut max_block = 0;

        for table_id in catalog.layout.discover_tables()? {
            max_table = max_table.max(table_id);

            let tmp = catalog.layout.table_record_tmp_path(table_id);
            if tmp.exists() {
                fs::remove_file(&tmp)?;
            }
            let path = catalog.layout.table_record_path(table_id);
            if !path.exists() {
                tracing::warn!(table_id, "Table directory without record, skipping");
                continue;
            }

            let record: TableRecord = read_record(&path)?;
            if record.id != table_id {
                return Err(TierError::Corruption(format!(
                    "record in directory {} claims table id {}",
                    table_id, record.id
                )));
            }
            stats.max_index = stats.max_index.max(record.max_index());

            let table = catalog.restore_table(&record, &mut stats)?;
            for segment in &record.segments {
                max_segment = max_segment.max(segment.id);
                for block in &segment.blocks {
                    max_block = max_block.max(block.id);
                }
            }

            if table.is_dropped() {
                stats.dropped_tables += 1;
            } else {
                let mut names = catalog.names.lock();
                if names.insert(table.name().to_string(), table.id()).is_some() {
                    return Err(TierError::Corruption(format!(
                        "two live tables named '{}'",
                        table.name()
                    )));
                }
            }
            stats.tables += 1;
            catalog.tables.write().insert(table.id(), table);
        }

        catalog.next_table_id.store(max_table + 1, Ordering::SeqCst);
        catalog.next_segment_id.store(max_segment + 1, Ordering::SeqCst);
        catalog.next_block_id.store(max_block + 1, Ordering::SeqCst);

        tracing::info!(
            tables = stats.tables,
            dropped = stats.dropped_tables,
            blocks = stats.blocks,
            rows = stats.rows,
            max_index = stats.max_index,
            "Catalog recovered"
        );
        Ok((catalog, stats))
    }

    fn restore_table(&self, record: &TableRecord, stats: &mut RecoveryStats) -> Result<Arc<Table>> {
        let flat: Vec<&BlockRecord> = record.blocks().collect();
        let keep = recoverable_rows(&flat);
        let column_count = record.schema.len();

        let mut keep_iter = keep.into_iter();
        let mut segment_ids = Vec::with_capacity(record.segments.len());
        let mut last_completed = None;
        let mut rows = 0u64;

        for seg_record in &record.segments {
            let segment = Arc::new(Segment::new(seg_record.id, record.id, self.segment_max_blocks));
            for blk_record in &seg_record.blocks {
                let visible = keep_iter.next().unwrap_or(0);
                let path = self.layout.block_path(record.id, seg_record.id, blk_record.id);
                if !path.exists() {
                    return Err(TierError::Corruption(format!(
                        "table {} lists block {} but {} is missing",
                        record.id,
                        blk_record.id,
                        path.display()
                    )));
                }

                let index = BlockIndex {
                    applied: blk_record.applied,
                    completed: blk_record.completed,
                    completed_rows: blk_record.completed_rows.min(visible),
                };
                let block = Arc::new(Block::recovered(
                    blk_record.id,
                    seg_record.id,
                    record.id,
                    self.block_max_rows.max(blk_record.rows),
                    column_count,
                    visible,
                    index,
                ));
                segment.push_block(block.id());
                last_completed = blk_record.completed.or(last_completed);
                rows += visible as u64;
                stats.blocks += 1;
                self.blocks.write().insert(block.id(), block);
            }

            if segment.is_full() {
                segment.set_state(SegmentState::Flushed);
            }
            segment_ids.push(segment.id());
            self.segments.write().insert(segment.id(), segment);
        }
        stats.rows += rows;

        Ok(Arc::new(Table::recovered(
            record.id,
            record.name.clone(),
            record.schema.clone(),
            record.create_index,
            record.drop_index,
            last_completed,
            segment_ids,
            rows,
        )))
    }

    // =========================================================================
    // Table Lifecycle
    // =========================================================================

    /// Register a new table and persist its record
    pub fn create_table(&self, schema: Schema, ctx: &TableOpCtx) -> Result<TableId> {
        schema.validate()?;
        if ctx.table_name.is_empty() {
            return Err(TierError::SchemaMismatch("table name is empty".to_string()));
        }
        if ctx.op_index == 0 {
            return Err(TierError::InvalidOpIndex("op index 0 is reserved".to_string()));
        }

        let id = {
            let mut names = self.names.lock();
            if names.contains_key(&ctx.table_name) {
                return Err(TierError::AlreadyExists(format!(
                    "table '{}'",
                    ctx.table_name
                )));
            }
            let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
            names.insert(ctx.table_name.clone(), id);
            id
        };

        let table = Arc::new(Table::new(
            id,
            ctx.table_name.clone(),
            schema,
            ctx.op_index,
        ));
        if let Err(e) = self.persist_table(&table) {
            self.names.lock().remove(&ctx.table_name);
            return Err(e);
        }
        self.tables.write().insert(id, table);

        tracing::info!(table_id = id, table = %ctx.table_name, op_index = ctx.op_index, "Table created");
        Ok(id)
    }

    /// Tombstone a table. Its segments and blocks stay untouched and readable.
    pub fn drop_table(&self, ctx: &DropTableCtx) -> Result<TableId> {
        if ctx.op_index == 0 {
            return Err(TierError::InvalidOpIndex("op index 0 is reserved".to_string()));
        }
        let not_found = || TierError::NotFound(format!("table '{}'", ctx.table_name));
        let id = self
            .names
            .lock()
            .get(&ctx.table_name)
            .copied()
            .ok_or_else(not_found)?;
        let table = self.reference_table(id)?;

        // Serialise with writers of this table
        let _append = table.lock_append();
        if table.is_dropped() {
            return Err(not_found());
        }

        table.set_drop_index(Some(ctx.op_index));
        {
            let _checkpoint = table.lock_checkpoint();
            if let Err(e) = self.persist_table(&table) {
                table.set_drop_index(None);
                return Err(e);
            }
        }

        let mut names = self.names.lock();
        if names.get(&ctx.table_name) == Some(&id) {
            names.remove(&ctx.table_name);
        }

        tracing::info!(table_id = id, table = %ctx.table_name, op_index = ctx.op_index, "Table dropped");
        Ok(id)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Owning handle to any table ever created, dropped ones included
    pub fn reference_table(&self, id: TableId) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TierError::NotFound(format!("table id {}", id)))
    }

    /// Live table by id
    pub fn weak_ref_table(&self, id: TableId) -> Result<Arc<Table>> {
        let table = self.reference_table(id)?;
        if table.is_dropped() {
            return Err(TierError::NotFound(format!("table id {} (dropped)", id)));
        }
        Ok(table)
    }

    /// Live table by name
    pub fn weak_ref_table_by_name(&self, name: &str) -> Result<Arc<Table>> {
        let id = self
            .names
            .lock()
            .get(name)
            .copied()
            .ok_or_else(|| TierError::NotFound(format!("table '{}'", name)))?;
        let table = self
            .reference_table(id)
            .map_err(|_| TierError::NotFound(format!("table '{}'", name)))?;
        if table.is_dropped() {
            return Err(TierError::NotFound(format!("table '{}' (dropped)", name)));
        }
        Ok(table)
    }

    /// Every table, dropped ones included, ordered by id
    pub fn tables(&self) -> Vec<Arc<Table>> {
        let mut tables: Vec<_> = self.tables.read().values().cloned().collect();
        tables.sort_by_key(|t| t.id());
        tables
    }

    pub fn segment(&self, id: SegmentId) -> Result<Arc<Segment>> {
        self.segments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TierError::NotFound(format!("segment {}", id)))
    }

    pub fn block(&self, id: BlockId) -> Result<Arc<Block>> {
        self.blocks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TierError::NotFound(format!("block {}", id)))
    }

    /// Blocks of a segment in append order
    pub fn segment_blocks(&self, segment: &Segment) -> Result<Vec<Arc<Block>>> {
        segment
            .block_ids()
            .into_iter()
            .map(|id| self.block(id))
            .collect()
    }

    /// Blocks of a table in table order
    pub fn table_blocks(&self, table: &Table) -> Result<Vec<Arc<Block>>> {
        let mut blocks = Vec::new();
        for segment_id in table.segment_ids() {
            let segment = self.segment(segment_id)?;
            blocks.extend(self.segment_blocks(&segment)?);
        }
        Ok(blocks)
    }

    /// Aggregated applied index of a segment under the configured policy
    pub fn segment_index(&self, segment_id: SegmentId) -> Result<Option<u64>> {
        let segment = self.segment(segment_id)?;
        let blocks = self.segment_blocks(&segment)?;
        Ok(segment.aggregated_index(&blocks, self.policy))
    }

    // =========================================================================
    // Arena Mutation (write path and checkpoints)
    // =========================================================================

    pub(crate) fn allocate_segment_id(&self) -> SegmentId {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn allocate_block_id(&self) -> BlockId {
        self.next_block_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register_segment(&self, segment: Arc<Segment>) {
        self.segments.write().insert(segment.id(), segment);
    }

    pub(crate) fn register_block(&self, block: Arc<Block>) {
        self.blocks.write().insert(block.id(), block);
    }

    /// Leading run of blocks that are durable, or will be once `committing` is
    pub(crate) fn durable_prefix(
        &self,
        table: &Table,
        committing: &HashSet<BlockId>,
    ) -> Result<Vec<Arc<Block>>> {
        Ok(self
            .table_blocks(table)?
            .into_iter()
            .take_while(|b| b.state() == BlockState::Durable || committing.contains(&b.id()))
            .collect())
    }

    /// Watermark implied by the current durable prefix
    pub(crate) fn prefix_watermark(&self, table: &Table) -> Result<Option<u64>> {
        let prefix = self.durable_prefix(table, &HashSet::new())?;
        Ok(prefix.last().and_then(|b| b.index().completed))
    }

    /// Record describing `table` once `committing` is durable
    pub(crate) fn table_record(
        &self,
        table: &Table,
        committing: &HashSet<BlockId>,
    ) -> Result<TableRecord> {
        let prefix = self.durable_prefix(table, committing)?;
        let durable_index = prefix.last().and_then(|b| b.index().completed);

        let mut segments: Vec<SegmentRecord> = Vec::new();
        for block in &prefix {
            let index = block.index();
            let blk = BlockRecord {
                id: block.id(),
                rows: block.rows(),
                applied: index.applied,
                completed: index.completed,
                completed_rows: index.completed_rows,
            };
            match segments.last_mut() {
                Some(seg) if seg.id == block.segment_id() => seg.blocks.push(blk),
                _ => segments.push(SegmentRecord {
                    id: block.segment_id(),
                    blocks: vec![blk],
                }),
            }
        }

        Ok(TableRecord {
            id: table.id(),
            name: table.name().to_string(),
            schema: table.schema().clone(),
            create_index: table.create_index(),
            drop_index: table.drop_index(),
            durable_index,
            segments,
        })
    }

    /// Rewrite the table record in place (tmp + rename)
    fn persist_table(&self, table: &Table) -> Result<()> {
        let record = self.table_record(table, &HashSet::new())?;
        let dir = self.layout.table_dir(table.id());
        fs::create_dir_all(&dir)?;

        let tmp = self.layout.table_record_tmp_path(table.id());
        write_record(&tmp, &record, self.layout.sync())?;
        if let Err(e) = fs::rename(&tmp, self.layout.table_record_path(table.id())) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.layout.sync_dir(&dir)?;
        self.layout.sync_dir(&self.layout.tables_dir())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn block_max_rows(&self) -> u32 {
        self.block_max_rows
    }

    pub fn segment_max_blocks(&self) -> u32 {
        self.segment_max_blocks
    }

    pub fn policy(&self) -> SegmentIndexPolicy {
        self.policy
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }
}
