//! Prefetched pages and column readers

use std::fmt;

use crate::buffer::PageHandle;
use crate::catalog::BlockId;
use crate::error::{Result, TierError};
use crate::types::{ColumnType, ColumnVector, Value};

/// Pins on the selected column pages of one block
pub struct PrefetchHandle {
    block_id: BlockId,
    rows: u32,
    /// (column index, type, pin) in acquisition order
    pinned: Vec<(usize, ColumnType, PageHandle)>,
    closed: bool,
}

impl PrefetchHandle {
    pub(crate) fn new(block_id: BlockId, rows: u32, pinned: Vec<(usize, ColumnType, PageHandle)>) -> Self {
        Self {
            block_id,
            rows,
            pinned,
            closed: false,
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Reader over column `attr`, which must be one of the snapshot's columns
    pub fn get_reader_by_attr(&self, attr: usize) -> Result<ColumnReader<'_>> {
        if self.closed {
            return Err(TierError::Cancelled(format!(
                "prefetch handle of block {} is closed",
                self.block_id
            )));
        }
        let (_, ty, handle) = self
            .pinned
            .iter()
            .find(|(column, _, _)| *column == attr)
            .ok_or_else(|| {
                TierError::SchemaMismatch(format!(
                    "column {} was not selected for block {}",
                    attr, self.block_id
                ))
            })?;
        Ok(ColumnReader {
            handle,
            ty: *ty,
            rows: self.rows as usize,
        })
    }

    /// Decode every visible row of column `attr`
    pub fn get_vector(&self, attr: usize) -> Result<ColumnVector> {
        self.get_reader_by_attr(attr)?.to_vector()
    }

    /// Unpin in reverse acquisition order. Idempotent.
    pub fn close(&mut self) {
        while let Some((_, _, handle)) = self.pinned.pop() {
            drop(handle);
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PrefetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchHandle")
            .field("block_id", &self.block_id)
            .field("rows", &self.rows)
            .field("pinned", &self.pinned.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Typed read access to the visible rows of one pinned column page
pub struct ColumnReader<'a> {
    handle: &'a PageHandle,
    ty: ColumnType,
    rows: usize,
}

impl ColumnReader<'_> {
    pub fn column_type(&self) -> ColumnType {
        self.ty
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Value at `row`, `None` past the visible rows
    pub fn get(&self, row: usize) -> Option<Value> {
        if row >= self.rows {
            return None;
        }
        self.handle.read(|data| self.ty.decode_value(data, row))
    }

    /// Decode every visible row
    pub fn to_vector(&self) -> Result<ColumnVector> {
        self.handle
            .read(|data| ColumnVector::decode(self.ty, data, self.rows))
    }
}

impl fmt::Debug for ColumnReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnReader")
            .field("key", &self.handle.key())
            .field("ty", &self.ty)
            .field("rows", &self.rows)
            .finish()
    }
}
