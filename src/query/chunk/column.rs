//! Column vectors
//!
//! A column stores only its present values, densely, next to a validity
//! bitmap with one bit per row. Variable-length strings keep a byte buffer
//! plus an offsets table. Row `i` maps to value slot
//! `count_ones(bitmap, 0, i)` when its bit is set.

use std::ops::Range;

use super::bitmap::{count_ones, get_bit, push_bit, push_bits, slice_bitmap};
use crate::query::error::QueryError;
use crate::query::schema::{DataType, ValueRef};

/// Typed dense value storage
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// Integer values
    Integer(Vec<i64>),
    /// Float values
    Float(Vec<f64>),
    /// Boolean values
    Boolean(Vec<bool>),
    /// String values: concatenated bytes and the start offset of each value
    String {
        /// UTF-8 bytes of all values
        data: Vec<u8>,
        /// Start offset of each value in `data`
        offsets: Vec<u32>,
    },
}

impl ColumnValues {
    fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Integer => ColumnValues::Integer(Vec::new()),
            DataType::Float => ColumnValues::Float(Vec::new()),
            DataType::Boolean => ColumnValues::Boolean(Vec::new()),
            DataType::String => ColumnValues::String {
                data: Vec::new(),
                offsets: Vec::new(),
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::String { offsets, .. } => offsets.len(),
        }
    }
}

/// One column vector of a chunk
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    data_type: DataType,
    values: ColumnValues,
    bitmap: Vec<u8>,
    rows: usize,
    nil_count: usize,
}

impl Column {
    /// Create an empty column of the given type
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            values: ColumnValues::new(data_type),
            bitmap: Vec::new(),
            rows: 0,
            nil_count: 0,
        }
    }

    /// Column type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of rows (values and NULLs)
    pub fn len(&self) -> usize {
        self.rows
    }

    /// True when no row was appended
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of NULL rows
    pub fn nil_count(&self) -> usize {
        self.nil_count
    }

    /// Number of stored (non-NULL) values
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Raw validity bitmap
    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    /// Dense value storage
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// Dense integer values, if this is an integer column
    pub fn integer_values(&self) -> Option<&[i64]> {
        match &self.values {
            ColumnValues::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Dense float values, if this is a float column
    pub fn float_values(&self) -> Option<&[f64]> {
        match &self.values {
            ColumnValues::Float(v) => Some(v),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Value appends
    // ------------------------------------------------------------------------

    /// Append dense integer values (validity is appended separately)
    ///
    /// # Panics
    ///
    /// Panics if the column is not an integer column.
    pub fn append_integer_values(&mut self, values: &[i64]) {
        match &mut self.values {
            ColumnValues::Integer(v) => v.extend_from_slice(values),
            _ => panic!("append integer values to {} column", self.data_type),
        }
    }

    /// Append dense float values (validity is appended separately)
    ///
    /// # Panics
    ///
    /// Panics if the column is not a float column.
    pub fn append_float_values(&mut self, values: &[f64]) {
        match &mut self.values {
            ColumnValues::Float(v) => v.extend_from_slice(values),
            _ => panic!("append float values to {} column", self.data_type),
        }
    }

    /// Append dense boolean values (validity is appended separately)
    ///
    /// # Panics
    ///
    /// Panics if the column is not a boolean column.
    pub fn append_boolean_values(&mut self, values: &[bool]) {
        match &mut self.values {
            ColumnValues::Boolean(v) => v.extend_from_slice(values),
            _ => panic!("append boolean values to {} column", self.data_type),
        }
    }

    /// Append dense string values (validity is appended separately)
    ///
    /// # Panics
    ///
    /// Panics if the column is not a string column.
    pub fn append_string_values<S: AsRef<str>>(&mut self, values: &[S]) {
        match &mut self.values {
            ColumnValues::String { data, offsets } => {
                for s in values {
                    offsets.push(data.len() as u32);
                    data.extend_from_slice(s.as_ref().as_bytes());
                }
            }
            _ => panic!("append string values to {} column", self.data_type),
        }
    }

    // ------------------------------------------------------------------------
    // Validity appends
    // ------------------------------------------------------------------------

    /// Mark the next `n` rows as present
    pub fn append_many_not_nil(&mut self, n: usize) {
        push_bits(&mut self.bitmap, self.rows, n, true);
        self.rows += n;
    }

    /// Append one NULL row
    pub fn append_nil(&mut self) {
        push_bit(&mut self.bitmap, self.rows, false);
        self.rows += 1;
        self.nil_count += 1;
    }

    /// Append `n` NULL rows
    pub fn append_many_nil(&mut self, n: usize) {
        push_bits(&mut self.bitmap, self.rows, n, false);
        self.rows += n;
        self.nil_count += n;
    }

    /// Append validity for several rows; `true` marks a present value
    pub fn append_validity(&mut self, valid: &[bool]) {
        for &v in valid {
            push_bit(&mut self.bitmap, self.rows, v);
            self.rows += 1;
            if !v {
                self.nil_count += 1;
            }
        }
    }

    /// Append one row: the value and its validity bit together
    ///
    /// # Panics
    ///
    /// Panics if the value type does not match the column type.
    pub fn append_value(&mut self, value: Option<ValueRef<'_>>) {
        match value {
            None => self.append_nil(),
            Some(v) => {
                match (&mut self.values, v) {
                    (ColumnValues::Integer(d), ValueRef::Integer(x)) => d.push(x),
                    (ColumnValues::Float(d), ValueRef::Float(x)) => d.push(x),
                    (ColumnValues::Boolean(d), ValueRef::Boolean(x)) => d.push(x),
                    (ColumnValues::String { data, offsets }, ValueRef::String(x)) => {
                        offsets.push(data.len() as u32);
                        data.extend_from_slice(x.as_bytes());
                    }
                    (_, other) => panic!(
                        "append {} value to {} column",
                        other.data_type(),
                        self.data_type
                    ),
                }
                self.append_many_not_nil(1);
            }
        }
    }

    /// Copy rows `range` of `other` onto the end of this column
    ///
    /// # Panics
    ///
    /// Panics if the column types differ.
    pub fn append_rows_from(&mut self, other: &Column, range: Range<usize>) {
        for (_, value) in other.iter_range(range) {
            self.append_value(value);
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// True if row `row` is NULL
    #[inline]
    pub fn is_nil(&self, row: usize) -> bool {
        !get_bit(&self.bitmap, row)
    }

    /// Value slot of `row` in the dense storage, if the row is present
    pub fn value_index(&self, row: usize) -> Option<usize> {
        if row >= self.rows || self.is_nil(row) {
            return None;
        }
        Some(count_ones(&self.bitmap, 0, row))
    }

    /// Value at `row`, `None` for NULL or out of range
    pub fn value(&self, row: usize) -> Option<ValueRef<'_>> {
        self.value_index(row).map(|slot| self.value_at_slot(slot))
    }

    /// Dense value at `slot`
    ///
    /// Callers pass slots derived from the bitmap, which always exist.
    fn value_at_slot(&self, slot: usize) -> ValueRef<'_> {
        match &self.values {
            ColumnValues::Integer(v) => ValueRef::Integer(v[slot]),
            ColumnValues::Float(v) => ValueRef::Float(v[slot]),
            ColumnValues::Boolean(v) => ValueRef::Boolean(v[slot]),
            ColumnValues::String { data, offsets } => {
                let start = offsets[slot] as usize;
                let end = offsets
                    .get(slot + 1)
                    .map(|&o| o as usize)
                    .unwrap_or(data.len());
                ValueRef::String(std::str::from_utf8(&data[start..end]).unwrap_or_default())
            }
        }
    }

    /// Iterate `(row, value)` over all rows
    pub fn iter(&self) -> ColumnIter<'_> {
        self.iter_range(0..self.rows)
    }

    /// Iterate `(row, value)` over `range`
    pub fn iter_range(&self, range: Range<usize>) -> ColumnIter<'_> {
        let end = range.end.min(self.rows);
        let start = range.start.min(end);
        ColumnIter {
            column: self,
            row: start,
            end,
            slot: count_ones(&self.bitmap, 0, start),
        }
    }

    /// Copy of rows `[start, end)` as a new column
    pub fn slice(&self, start: usize, end: usize) -> Column {
        let mut out = Column::new(self.data_type);
        out.append_rows_from(self, start..end);
        debug_assert_eq!(out.bitmap, slice_bitmap(&self.bitmap, start, end.min(self.rows)));
        out
    }

    /// Drop all rows, keeping the type
    pub fn reset(&mut self) {
        self.values = ColumnValues::new(self.data_type);
        self.bitmap.clear();
        self.rows = 0;
        self.nil_count = 0;
    }

    /// Approximate heap size in bytes
    pub fn memory_size(&self) -> usize {
        let values = match &self.values {
            ColumnValues::Integer(v) => v.len() * 8,
            ColumnValues::Float(v) => v.len() * 8,
            ColumnValues::Boolean(v) => v.len(),
            ColumnValues::String { data, offsets } => data.len() + offsets.len() * 4,
        };
        values + self.bitmap.len()
    }

    /// Check the value/validity bookkeeping
    pub fn validate(&self) -> Result<(), QueryError> {
        let bits = count_ones(&self.bitmap, 0, self.rows);
        if bits != self.values.len() {
            return Err(QueryError::validation(format!(
                "column has {} present bits but {} values",
                bits,
                self.values.len()
            )));
        }
        if self.rows - bits != self.nil_count {
            return Err(QueryError::validation(format!(
                "column nil count {} does not match bitmap ({} nulls)",
                self.nil_count,
                self.rows - bits
            )));
        }
        if self.bitmap.len() != self.rows.div_ceil(8) {
            return Err(QueryError::validation(format!(
                "column bitmap holds {} bytes for {} rows",
                self.bitmap.len(),
                self.rows
            )));
        }
        Ok(())
    }
}

/// Sequential `(row, value)` iterator over a column range
pub struct ColumnIter<'a> {
    column: &'a Column,
    row: usize,
    end: usize,
    slot: usize,
}

impl<'a> Iterator for ColumnIter<'a> {
    type Item = (usize, Option<ValueRef<'a>>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.end {
            return None;
        }
        let row = self.row;
        self.row += 1;
        if self.column.is_nil(row) {
            return Some((row, None));
        }
        let value = self.column.value_at_slot(self.slot);
        self.slot += 1;
        Some((row, Some(value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.row;
        (remaining, Some(remaining))
    }
}
