//! Row batches
//!
//! Typed column vectors handed to the write path and returned by column readers.

use std::ops::Range;

use bytes::{Buf, BufMut};

use crate::error::{Result, TierError};

use super::{ColumnType, Value};

/// One typed column of values
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVector {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl ColumnVector {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnVector::Bool(_) => ColumnType::Bool,
            ColumnVector::Int32(_) => ColumnType::Int32,
            ColumnVector::Int64(_) => ColumnType::Int64,
            ColumnVector::UInt64(_) => ColumnType::UInt64,
            ColumnVector::Float32(_) => ColumnType::Float32,
            ColumnVector::Float64(_) => ColumnType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnVector::Bool(v) => v.len(),
            ColumnVector::Int32(v) => v.len(),
            ColumnVector::Int64(v) => v.len(),
            ColumnVector::UInt64(v) => v.len(),
            ColumnVector::Float32(v) => v.len(),
            ColumnVector::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<Value> {
        match self {
            ColumnVector::Bool(v) => v.get(idx).map(|x| Value::Bool(*x)),
            ColumnVector::Int32(v) => v.get(idx).map(|x| Value::Int32(*x)),
            ColumnVector::Int64(v) => v.get(idx).map(|x| Value::Int64(*x)),
            ColumnVector::UInt64(v) => v.get(idx).map(|x| Value::UInt64(*x)),
            ColumnVector::Float32(v) => v.get(idx).map(|x| Value::Float32(*x)),
            ColumnVector::Float64(v) => v.get(idx).map(|x| Value::Float64(*x)),
        }
    }

    /// Append the encoded values of `range` to `buf`
    ///
    /// Panics if `range` is out of bounds; callers slice by validated row counts.
    pub fn encode_range(&self, range: Range<usize>, buf: &mut impl BufMut) {
        match self {
            ColumnVector::Bool(v) => v[range].iter().for_each(|x| buf.put_u8(*x as u8)),
            ColumnVector::Int32(v) => v[range].iter().for_each(|x| buf.put_i32_le(*x)),
            ColumnVector::Int64(v) => v[range].iter().for_each(|x| buf.put_i64_le(*x)),
            ColumnVector::UInt64(v) => v[range].iter().for_each(|x| buf.put_u64_le(*x)),
            ColumnVector::Float32(v) => v[range].iter().for_each(|x| buf.put_f32_le(*x)),
            ColumnVector::Float64(v) => v[range].iter().for_each(|x| buf.put_f64_le(*x)),
        }
    }

    /// Decode `rows` values of type `ty` from an encoded column
    pub fn decode(ty: ColumnType, mut data: &[u8], rows: usize) -> Result<Self> {
        let needed = rows * ty.width();
        if data.len() < needed {
            return Err(TierError::Corruption(format!(
                "column of {} rows needs {} bytes, found {}",
                rows,
                needed,
                data.len()
            )));
        }
        let vector = match ty {
            ColumnType::Bool => ColumnVector::Bool((0..rows).map(|_| data.get_u8() != 0).collect()),
            ColumnType::Int32 => ColumnVector::Int32((0..rows).map(|_| data.get_i32_le()).collect()),
            ColumnType::Int64 => ColumnVector::Int64((0..rows).map(|_| data.get_i64_le()).collect()),
            ColumnType::UInt64 => {
                ColumnVector::UInt64((0..rows).map(|_| data.get_u64_le()).collect())
            }
            ColumnType::Float32 => {
                ColumnVector::Float32((0..rows).map(|_| data.get_f32_le()).collect())
            }
            ColumnType::Float64 => {
                ColumnVector::Float64((0..rows).map(|_| data.get_f64_le()).collect())
            }
        };
        Ok(vector)
    }
}

/// A batch of rows stored column by column
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    columns: Vec<ColumnVector>,
    rows: usize,
}

impl RowBatch {
    /// Build a batch; every column must hold the same number of rows
    pub fn new(columns: Vec<ColumnVector>) -> Result<Self> {
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        if let Some((idx, column)) = columns.iter().enumerate().find(|(_, c)| c.len() != rows) {
            return Err(TierError::SchemaMismatch(format!(
                "column {} has {} rows, expected {}",
                idx,
                column.len(),
                rows
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Typed vector of column `attr`
    pub fn get_vector(&self, attr: usize) -> Option<&ColumnVector> {
        self.columns.get(attr)
    }

    pub fn columns(&self) -> &[ColumnVector] {
        &self.columns
    }
}
