//! Request contexts
//!
//! Every mutation names its table and carries the log index (OpIndex) it was
//! assigned upstream. Indices need not be dense.

use crate::catalog::SegmentId;
use crate::types::RowBatch;

/// Context of `create_table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOpCtx {
    pub table_name: String,
    pub op_index: u64,
}

impl TableOpCtx {
    pub fn new(table_name: impl Into<String>, op_index: u64) -> Self {
        Self {
            table_name: table_name.into(),
            op_index,
        }
    }
}

/// Context of `drop_table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTableCtx {
    pub table_name: String,
    pub op_index: u64,
}

impl DropTableCtx {
    pub fn new(table_name: impl Into<String>, op_index: u64) -> Self {
        Self {
            table_name: table_name.into(),
            op_index,
        }
    }
}

/// One append of a row batch
#[derive(Debug, Clone)]
pub struct AppendCtx {
    pub table_name: String,
    pub data: RowBatch,
    pub op_index: u64,
}

impl AppendCtx {
    pub fn new(table_name: impl Into<String>, data: RowBatch, op_index: u64) -> Self {
        Self {
            table_name: table_name.into(),
            data,
            op_index,
        }
    }
}

/// Which part of a table a snapshot covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetSnapshotCtx {
    pub table_name: String,
    /// Cover every segment; `segment_ids` is ignored
    pub scan_all: bool,
    pub segment_ids: Vec<SegmentId>,
    /// Column indices to read; empty means all columns
    pub columns: Vec<usize>,
}

impl GetSnapshotCtx {
    /// Every segment, every column
    pub fn scan_all(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            scan_all: true,
            ..Default::default()
        }
    }

    /// Only `segment_ids`, every column
    pub fn segments(table_name: impl Into<String>, segment_ids: Vec<SegmentId>) -> Self {
        Self {
            table_name: table_name.into(),
            scan_all: false,
            segment_ids,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<usize>) -> Self {
        self.columns = columns;
        self
    }
}

/// Context of `get_segment_ids`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSegmentsCtx {
    pub table_name: String,
}

impl GetSegmentsCtx {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }
}
