//! Chunk - the columnar unit of data flow
//!
//! A chunk is a named batch of rows with:
//! - a time column
//! - tag groups: `(tags, start row)` pairs marking contiguous rows that share
//!   one tag set
//! - interval index: the start row of every window; every tag boundary is
//!   also a window boundary
//! - one column vector per schema field
//!
//! Chunks move by value along ports. A consumer that needs to retain one
//! beyond the producer's scope calls `clone()`, which is a deep copy.

pub mod bitmap;
pub mod column;

pub use column::{Column, ColumnIter, ColumnValues};

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::query::error::QueryError;
use crate::query::schema::{RowDataType, ValueRef};

// ============================================================================
// Chunk Tags
// ============================================================================

/// Ordered tag set of one tag group (`key=value` pairs sorted by key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkTags {
    pairs: Vec<(String, String)>,
}

impl ChunkTags {
    /// Create from pairs (sorted by key on construction)
    pub fn new(mut pairs: Vec<(String, String)>) -> Self {
        pairs.sort();
        Self { pairs }
    }

    /// Parse `"k1=v1,k2=v2"`; an empty value (`"k="`) is allowed
    pub fn parse(s: &str) -> Self {
        let pairs = s
            .split(',')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (part.to_string(), String::new()),
            })
            .collect();
        Self::new(pairs)
    }

    /// All pairs in key order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Value of tag `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Keep only the tags named in `dimensions` (missing ones become empty)
    pub fn subset(&self, dimensions: &[String]) -> ChunkTags {
        let pairs = dimensions
            .iter()
            .map(|d| (d.clone(), self.get(d).unwrap_or_default().to_string()))
            .collect();
        ChunkTags::new(pairs)
    }

    /// Canonical `k1=v1,k2=v2` key
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// True when no tag is set
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for ChunkTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// Columnar batch of rows flowing between processors
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    name: String,
    schema: Arc<RowDataType>,
    tags: Vec<ChunkTags>,
    tag_index: Vec<usize>,
    interval_index: Vec<usize>,
    time: Vec<i64>,
    columns: Vec<Column>,
}

impl Chunk {
    /// Create an empty chunk bound to `schema`
    pub fn new(name: impl Into<String>, schema: Arc<RowDataType>) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::new(f.data_type))
            .collect();
        Self {
            name: name.into(),
            schema,
            tags: Vec::new(),
            tag_index: Vec::new(),
            interval_index: Vec::new(),
            time: Vec::new(),
            columns,
        }
    }

    /// Source table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the chunk
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Column schema
    pub fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    /// Tag set of every tag group
    pub fn tags(&self) -> &[ChunkTags] {
        &self.tags
    }

    /// Start row of every tag group
    pub fn tag_index(&self) -> &[usize] {
        &self.tag_index
    }

    /// Start row of every window
    pub fn interval_index(&self) -> &[usize] {
        &self.interval_index
    }

    /// Time column
    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// All column vectors
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column `i`
    ///
    /// # Panics
    ///
    /// Panics if `i` is not a schema position.
    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    /// Mutable column `i`
    ///
    /// # Panics
    ///
    /// Panics if `i` is not a schema position.
    pub fn column_mut(&mut self, i: usize) -> &mut Column {
        &mut self.columns[i]
    }

    /// Total number of rows
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Alias of `len`, kept for callers that count rows explicitly
    pub fn row_nums(&self) -> usize {
        self.len()
    }

    /// True when the chunk holds no row
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    // ------------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------------

    /// Append tag groups with their start rows
    ///
    /// Start rows must be strictly increasing and continue after the last
    /// appended group.
    pub fn append_tags_and_indexes(&mut self, tags: Vec<ChunkTags>, starts: &[usize]) {
        debug_assert_eq!(tags.len(), starts.len());
        debug_assert!(starts.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(match (self.tag_index.last(), starts.first()) {
            (Some(&last), Some(&first)) => first > last,
            _ => true,
        });
        self.tags.extend(tags);
        self.tag_index.extend_from_slice(starts);
    }

    /// Append a single tag group starting at `start`
    pub fn append_tag_and_index(&mut self, tags: ChunkTags, start: usize) {
        self.append_tags_and_indexes(vec![tags], &[start]);
    }

    /// Append window start rows
    pub fn append_interval_index(&mut self, starts: &[usize]) {
        debug_assert!(starts.windows(2).all(|w| w[0] < w[1]));
        self.interval_index.extend_from_slice(starts);
    }

    /// Append timestamps
    pub fn append_time(&mut self, times: &[i64]) {
        self.time.extend_from_slice(times);
    }

    /// Append one timestamp
    pub fn add_time(&mut self, t: i64) {
        self.time.push(t);
    }

    /// Start a new tag group at the current row count when `tags` differ
    /// from the last group
    ///
    /// Returns true when a group was opened.
    pub fn open_tag_group(&mut self, tags: &ChunkTags) -> bool {
        let row = self.len();
        if self.tags.last() == Some(tags) {
            return false;
        }
        self.tags.push(tags.clone());
        self.tag_index.push(row);
        if self.interval_index.last() != Some(&row) {
            self.interval_index.push(row);
        }
        true
    }

    /// Mark the current row count as a window start (no-op if already marked)
    pub fn open_window(&mut self) {
        let row = self.len();
        if self.interval_index.last() != Some(&row) {
            self.interval_index.push(row);
        }
    }

    /// Copy row `row` of `src` (time and every column) to the end
    ///
    /// Tag and window bookkeeping is left to the caller.
    pub fn append_row_from(&mut self, src: &Chunk, row: usize) {
        self.time.push(src.time[row]);
        for (dst, col) in self.columns.iter_mut().zip(src.columns.iter()) {
            dst.append_value(col.value(row));
        }
    }

    /// Append one row from explicit values
    ///
    /// # Panics
    ///
    /// Panics if `values` does not match the schema width or column types.
    pub fn append_row(&mut self, time: i64, values: &[Option<ValueRef<'_>>]) {
        assert_eq!(values.len(), self.columns.len(), "row width mismatch");
        self.time.push(time);
        for (col, value) in self.columns.iter_mut().zip(values.iter()) {
            col.append_value(*value);
        }
    }

    /// Drop every row and group, keeping name and schema
    pub fn reset(&mut self) {
        self.tags.clear();
        self.tag_index.clear();
        self.interval_index.clear();
        self.time.clear();
        for col in &mut self.columns {
            col.reset();
        }
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Row range of tag group `i`
    pub fn tag_range(&self, i: usize) -> Range<usize> {
        let start = self.tag_index[i];
        let end = self.tag_index.get(i + 1).copied().unwrap_or(self.len());
        start..end
    }

    /// `(tags, row range)` for every tag group
    pub fn tag_spans(&self) -> impl Iterator<Item = (&ChunkTags, Range<usize>)> + '_ {
        (0..self.tags.len()).map(move |i| (&self.tags[i], self.tag_range(i)))
    }

    /// Window row ranges inside `range` (normally a tag group range)
    pub fn window_spans(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let mut starts: Vec<usize> = self
            .interval_index
            .iter()
            .copied()
            .filter(|&s| s > range.start && s < range.end)
            .collect();
        starts.insert(0, range.start);

        let mut spans = Vec::with_capacity(starts.len());
        for (i, &s) in starts.iter().enumerate() {
            let e = starts.get(i + 1).copied().unwrap_or(range.end);
            spans.push(s..e);
        }
        spans
    }

    /// Copy rows `[start, end)` into a new chunk, re-basing tag and window
    /// boundaries
    pub fn slice_rows(&self, start: usize, end: usize) -> Chunk {
        let end = end.min(self.len());
        let mut out = Chunk::new(self.name.clone(), self.schema.clone());
        if start >= end {
            return out;
        }

        for (i, tags) in self.tags.iter().enumerate() {
            let r = self.tag_range(i);
            if r.end <= start || r.start >= end {
                continue;
            }
            out.tags.push(tags.clone());
            out.tag_index.push(r.start.max(start) - start);
        }
        out.interval_index.push(0);
        out.interval_index.extend(
            self.interval_index
                .iter()
                .filter(|&&s| s > start && s < end)
                .map(|&s| s - start),
        );
        out.time.extend_from_slice(&self.time[start..end]);
        for (dst, col) in out.columns.iter_mut().zip(self.columns.iter()) {
            dst.append_rows_from(col, start..end);
        }
        out
    }

    /// Approximate heap size in bytes
    pub fn memory_size(&self) -> usize {
        self.time.len() * 8
            + (self.tag_index.len() + self.interval_index.len()) * 8
            + self.columns.iter().map(|c| c.memory_size()).sum::<usize>()
    }

    /// Check every structural invariant of the chunk
    ///
    /// - tag and interval indexes strictly increase from 0 and stay below
    ///   the row count
    /// - every tag boundary is also an interval boundary
    /// - columns match the schema and carry one validity bit per row
    pub fn validate(&self) -> Result<(), QueryError> {
        let rows = self.len();
        if self.tags.len() != self.tag_index.len() {
            return Err(QueryError::validation(format!(
                "chunk {} has {} tag sets for {} tag boundaries",
                self.name,
                self.tags.len(),
                self.tag_index.len()
            )));
        }
        if rows == 0 {
            return Ok(());
        }
        check_index("tag", &self.tag_index, rows)?;
        check_index("interval", &self.interval_index, rows)?;
        if self.tag_index.len() > self.interval_index.len() {
            return Err(QueryError::validation(
                "tag index is longer than interval index",
            ));
        }
        if let Some(missing) = self
            .tag_index
            .iter()
            .find(|t| self.interval_index.binary_search(t).is_err())
        {
            return Err(QueryError::validation(format!(
                "tag boundary {} is not a window boundary",
                missing
            )));
        }
        if self.columns.len() != self.schema.len() {
            return Err(QueryError::validation(format!(
                "chunk has {} columns, schema has {}",
                self.columns.len(),
                self.schema.len()
            )));
        }
        for (i, (col, field)) in self.columns.iter().zip(self.schema.fields()).enumerate() {
            if col.data_type() != field.data_type {
                return Err(QueryError::validation(format!(
                    "column {} ({}) is {} but schema says {}",
                    i,
                    field.name,
                    col.data_type(),
                    field.data_type
                )));
            }
            if col.len() != rows {
                return Err(QueryError::validation(format!(
                    "column {} ({}) has {} rows, chunk has {}",
                    i,
                    field.name,
                    col.len(),
                    rows
                )));
            }
            col.validate()?;
        }
        Ok(())
    }
}

fn check_index(what: &str, index: &[usize], rows: usize) -> Result<(), QueryError> {
    if index.first() != Some(&0) {
        return Err(QueryError::validation(format!(
            "{} index must start at row 0",
            what
        )));
    }
    if !index.windows(2).all(|w| w[0] < w[1]) {
        return Err(QueryError::validation(format!(
            "{} index is not strictly increasing",
            what
        )));
    }
    if index.last().is_some_and(|&last| last >= rows) {
        return Err(QueryError::validation(format!(
            "{} index points past the last row",
            what
        )));
    }
    Ok(())
}

// ============================================================================
// Chunk Builder
// ============================================================================

/// Creates chunks bound to one schema
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    schema: Arc<RowDataType>,
}

impl ChunkBuilder {
    /// Create a builder for `schema`
    pub fn new(schema: Arc<RowDataType>) -> Self {
        Self { schema }
    }

    /// New empty chunk named `name`
    pub fn new_chunk(&self, name: impl Into<String>) -> Chunk {
        Chunk::new(name, self.schema.clone())
    }

    /// Schema of the chunks this builder creates
    pub fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }
}
