//! Storage cursors
//!
//! Pull-based readers producing chunks for one partition of a query:
//!
//! ```text
//! [AggregateCursor]                when the query aggregates in the cursors
//!   └─ GroupCursor                 one per partition
//!        └─ TagSetCursor           one per series, k-way time merge
//!             ├─ FileLoopCursor    immutable files (one per non-overlapping run)
//!             └─ SeriesCursor      mutable table snapshot
//! ```
//!
//! Every cursor follows the same state machine: `Open` until the first
//! `next_chunk`, `Iterating` until `close`, then `Closed`. `next_chunk`
//! after `close` is a `CursorClosed` error; `close` is idempotent and may be
//! requested from another task through a cloned [`CursorState`]. An abort
//! through the query's token ends the stream cleanly with `Ok(None)`.

pub mod aggregate;
pub mod file_loop;
pub mod group;
pub(crate) mod merge;
pub mod series;
pub mod tag_set;

pub use aggregate::AggregateCursor;
pub use file_loop::FileLoopCursor;
pub use group::GroupCursor;
pub use series::SeriesCursor;
pub use tag_set::TagSetCursor;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;
use crate::types::{SeriesId, TimeRange};

/// Identity of the series a chunk was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    /// Internal series id
    pub id: SeriesId,
    /// Opaque series key
    pub key: Vec<u8>,
    /// Full tag set of the series
    pub tags: ChunkTags,
}

/// One step of a cursor: a chunk and, for single-series cursors, its series
pub type CursorItem = (Chunk, Option<SeriesInfo>);

/// Pull-based chunk reader
pub trait KeyCursor: Send {
    /// Cursor kind, for logs and errors
    fn name(&self) -> &'static str;

    /// Schema of the produced chunks
    fn schema(&self) -> &Arc<RowDataType>;

    /// Next chunk, `None` at end of stream or after an abort
    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError>;

    /// Release children and buffers; idempotent
    fn close(&mut self);

    /// Shared state, clone it to close the cursor from another task
    fn state(&self) -> &CursorState;
}

impl std::fmt::Debug for dyn KeyCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCursor")
            .field("name", &self.name())
            .field("phase", &self.state().phase())
            .finish()
    }
}

// ============================================================================
// Cursor state
// ============================================================================

const OPEN: u8 = 0;
const ITERATING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle phase of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    /// Built, nothing read yet
    Open,
    /// At least one `next_chunk` call
    Iterating,
    /// Closed, reads fail
    Closed,
}

/// Lifecycle flag shared between a cursor and whoever may close it
#[derive(Debug, Clone, Default)]
pub struct CursorState(Arc<AtomicU8>);

impl CursorState {
    /// Fresh state in the `Open` phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> CursorPhase {
        match self.0.load(Ordering::Acquire) {
            OPEN => CursorPhase::Open,
            ITERATING => CursorPhase::Iterating,
            _ => CursorPhase::Closed,
        }
    }

    /// Enter `Iterating`; fails once closed
    pub fn begin_next(&self, cursor: &str) -> Result<(), QueryError> {
        match self
            .0
            .compare_exchange(OPEN, ITERATING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(ITERATING) => Ok(()),
            Err(_) => Err(QueryError::cursor_closed(cursor)),
        }
    }

    /// Move to `Closed`; true for the call that actually closed
    pub fn close(&self) -> bool {
        self.0.swap(CLOSED, Ordering::AcqRel) != CLOSED
    }

    /// True once closed
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire) == CLOSED
    }
}

// ============================================================================
// Row selection shared by the leaves
// ============================================================================

/// Rows of a time-sorted series chunk that the query reads
///
/// Keeps rows inside `[start_time, end_time)` that satisfy the condition,
/// in the requested order, as a single tag group of `tags`.
pub(crate) fn select_rows(chunk: &Chunk, options: &ProcessorOptions, tags: &ChunkTags) -> Chunk {
    let range = TimeRange::new_unchecked(options.start_time, options.end_time);
    let times = chunk.time();
    let mut rows: Vec<usize> = (0..chunk.len())
        .filter(|&row| range.contains(times[row]))
        .filter(|&row| {
            options
                .condition
                .as_ref()
                .map_or(true, |c| c.matches_row(chunk, tags, row))
        })
        .collect();
    if !options.ascending {
        rows.reverse();
    }

    let mut out = Chunk::new(chunk.name().to_string(), chunk.schema().clone());
    if !rows.is_empty() {
        out.open_tag_group(tags);
    }
    for row in rows {
        out.append_row_from(chunk, row);
    }
    out
}

/// Split `chunk` into pieces of at most `size` rows
pub(crate) fn split_rows(chunk: Chunk, size: usize) -> Vec<Chunk> {
    if chunk.len() <= size {
        return vec![chunk];
    }
    (0..chunk.len())
        .step_by(size)
        .map(|start| chunk.slice_rows(start, start + size))
        .collect()
}
