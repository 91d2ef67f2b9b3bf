//! Types Module
//!
//! Schema definitions and the row-batch abstraction appended by clients.
//!
//! ## Column Encoding
//! Every column type is fixed width and stored little-endian, so a page holding
//! `n` rows of a column is exactly `n * width` bytes and row `i` starts at
//! `i * width`.

mod batch;

use std::collections::HashSet;
use std::fmt;

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TierError};

pub use batch::{ColumnVector, RowBatch};

/// Supported column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ColumnType {
    /// Width of one encoded value in bytes
    pub fn width(&self) -> usize {
        match self {
            ColumnType::Bool => 1,
            ColumnType::Int32 | ColumnType::Float32 => 4,
            ColumnType::Int64 | ColumnType::UInt64 | ColumnType::Float64 => 8,
        }
    }

    /// Stable tag used by the block file column directory
    pub fn tag(&self) -> u8 {
        match self {
            ColumnType::Bool => 1,
            ColumnType::Int32 => 2,
            ColumnType::Int64 => 3,
            ColumnType::UInt64 => 4,
            ColumnType::Float32 => 5,
            ColumnType::Float64 => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ColumnType::Bool),
            2 => Some(ColumnType::Int32),
            3 => Some(ColumnType::Int64),
            4 => Some(ColumnType::UInt64),
            5 => Some(ColumnType::Float32),
            6 => Some(ColumnType::Float64),
            _ => None,
        }
    }

    /// Decode the value at `row` from an encoded column
    pub fn decode_value(&self, data: &[u8], row: usize) -> Option<Value> {
        let width = self.width();
        let start = row.checked_mul(width)?;
        let mut bytes = data.get(start..start + width)?;
        let value = match self {
            ColumnType::Bool => Value::Bool(bytes.get_u8() != 0),
            ColumnType::Int32 => Value::Int32(bytes.get_i32_le()),
            ColumnType::Int64 => Value::Int64(bytes.get_i64_le()),
            ColumnType::UInt64 => Value::UInt64(bytes.get_u64_le()),
            ColumnType::Float32 => Value::Float32(bytes.get_f32_le()),
            ColumnType::Float64 => Value::Float64(bytes.get_f64_le()),
        };
        Some(value)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "BOOL",
            ColumnType::Int32 => "INT32",
            ColumnType::Int64 => "INT64",
            ColumnType::UInt64 => "UINT64",
            ColumnType::Float32 => "FLOAT32",
            ColumnType::Float64 => "FLOAT64",
        };
        f.write_str(name)
    }
}

/// A single decoded value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int32(_) => ColumnType::Int32,
            Value::Int64(_) => ColumnType::Int64,
            Value::UInt64(_) => ColumnType::UInt64,
            Value::Float32(_) => ColumnType::Float32,
            Value::Float64(_) => ColumnType::Float64,
        }
    }
}

/// Definition of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered column definitions of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    /// A schema needs at least one column and unique column names
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(TierError::SchemaMismatch(
                "schema has no columns".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(TierError::SchemaMismatch(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.ty).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Bytes one row occupies across all columns
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(|c| c.ty.width()).sum()
    }

    /// Check that a batch can be appended to a table with this schema
    pub fn check_batch(&self, batch: &RowBatch) -> Result<()> {
        if batch.column_count() != self.columns.len() {
            return Err(TierError::SchemaMismatch(format!(
                "expected {} columns, batch has {}",
                self.columns.len(),
                batch.column_count()
            )));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            let vector = batch
                .get_vector(idx)
                .ok_or_else(|| TierError::SchemaMismatch(format!("missing column {}", idx)))?;
            if vector.column_type() != column.ty {
                return Err(TierError::SchemaMismatch(format!(
                    "column '{}' expects {}, batch has {}",
                    column.name,
                    column.ty,
                    vector.column_type()
                )));
            }
        }
        Ok(())
    }
}
