//! Immutable file leaf
//!
//! Walks the files of one series in time order, reading the series' rows
//! from each, filtering them and projecting the requested columns. The
//! files handed to one cursor must not overlap in time; overlapping files
//! go to separate cursors merged by the tag-set cursor.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{select_rows, split_rows, CursorItem, CursorState, KeyCursor, SeriesInfo};
use crate::query::chunk::Chunk;
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;
use crate::storage::FileRef;
use crate::types::TimeRange;

/// Leaf cursor over a run of immutable files
pub struct FileLoopCursor {
    state: CursorState,
    schema: Arc<RowDataType>,
    options: Arc<ProcessorOptions>,
    series: SeriesInfo,
    /// Held for the cursor's lifetime, released on close
    files: Vec<FileRef>,
    next_file: usize,
    pending: VecDeque<Chunk>,
}

impl FileLoopCursor {
    /// Cursor reading `series` from `files`, ordered in the query direction
    pub fn new(
        files: Vec<FileRef>,
        series: SeriesInfo,
        schema: Arc<RowDataType>,
        options: Arc<ProcessorOptions>,
    ) -> Self {
        Self {
            state: CursorState::new(),
            schema,
            options,
            series,
            files,
            next_file: 0,
            pending: VecDeque::new(),
        }
    }

    /// Files still referenced by this cursor
    pub fn files(&self) -> &[FileRef] {
        &self.files
    }
}

impl KeyCursor for FileLoopCursor {
    fn name(&self) -> &'static str {
        "file_loop"
    }

    fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
        self.state.begin_next(self.name())?;
        let range = TimeRange::new_unchecked(self.options.start_time, self.options.end_time);
        loop {
            if self.options.abort.is_cancelled() {
                return Ok(None);
            }
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some((chunk, Some(self.series.clone()))));
            }
            let Some(file) = self.files.get(self.next_file) else {
                return Ok(None);
            };
            self.next_file += 1;
            if !file.overlaps(&range) || !file.contains_series(self.series.id) {
                continue;
            }

            let Some(raw) = file.read_series(self.series.id, &range, &self.schema)? else {
                continue;
            };
            tracing::debug!(
                file = file.path(),
                series = self.series.id,
                rows = raw.len(),
                "File rows loaded"
            );
            let rows = select_rows(&raw, &self.options, &self.series.tags);
            if !rows.is_empty() {
                self.pending.extend(split_rows(rows, self.options.chunk_size));
            }
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.files.clear();
            self.pending.clear();
        }
    }

    fn state(&self) -> &CursorState {
        &self.state
    }
}
