//! Mutable table leaf
//!
//! Serves the rows of one series that are still in the shard's mutable
//! table. The rows are snapshotted when the cursor is built, so writes that
//! land afterwards are not seen by this query.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{select_rows, split_rows, CursorItem, CursorState, KeyCursor, SeriesInfo};
use crate::query::chunk::Chunk;
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;

/// Leaf cursor over a snapshot of one series
pub struct SeriesCursor {
    state: CursorState,
    schema: Arc<RowDataType>,
    options: Arc<ProcessorOptions>,
    series: SeriesInfo,
    snapshot: Option<Chunk>,
    pending: VecDeque<Chunk>,
}

impl SeriesCursor {
    /// Cursor over `snapshot`, the time-sorted rows of `series`
    pub fn new(snapshot: Chunk, series: SeriesInfo, options: Arc<ProcessorOptions>) -> Self {
        Self {
            state: CursorState::new(),
            schema: snapshot.schema().clone(),
            options,
            series,
            snapshot: Some(snapshot),
            pending: VecDeque::new(),
        }
    }
}

impl KeyCursor for SeriesCursor {
    fn name(&self) -> &'static str {
        "series"
    }

    fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
        self.state.begin_next(self.name())?;
        if self.options.abort.is_cancelled() {
            return Ok(None);
        }
        if let Some(snapshot) = self.snapshot.take() {
            let rows = select_rows(&snapshot, &self.options, &self.series.tags);
            if !rows.is_empty() {
                self.pending.extend(split_rows(rows, self.options.chunk_size));
            }
        }
        Ok(self
            .pending
            .pop_front()
            .map(|chunk| (chunk, Some(self.series.clone()))))
    }

    fn close(&mut self) {
        if self.state.close() {
            self.snapshot = None;
            self.pending.clear();
        }
    }

    fn state(&self) -> &CursorState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::chunk::ChunkTags;
    use crate::query::error::QueryErrorKind;
    use crate::query::schema::{DataType, Field, ValueRef};

    fn cursor(options: ProcessorOptions) -> SeriesCursor {
        let schema = RowDataType::shared(vec![Field::new("v", DataType::Float)]);
        let mut snapshot = Chunk::new("cpu", schema);
        for t in 1..=5 {
            snapshot.append_row(t, &[Some(ValueRef::Float(t as f64))]);
        }
        let series = SeriesInfo {
            id: 7,
            key: b"cpu,host=a".to_vec(),
            tags: ChunkTags::parse("host=a"),
        };
        SeriesCursor::new(snapshot, series, Arc::new(options))
    }

    #[test]
    fn test_snapshot_is_chunked() {
        let mut c = cursor(ProcessorOptions::new("cpu").with_chunk_size(2));
        let mut sizes = Vec::new();
        while let Some((chunk, info)) = c.next_chunk().unwrap() {
            assert_eq!(info.unwrap().id, 7);
            assert_eq!(chunk.tags()[0].get("host"), Some("a"));
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_abort_ends_stream() {
        let options = ProcessorOptions::new("cpu");
        options.abort.cancel();
        let mut c = cursor(options);
        assert!(c.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_next_after_close() {
        let mut c = cursor(ProcessorOptions::new("cpu"));
        c.close();
        c.close();
        let err = c.next_chunk().unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::CursorClosed);
    }
}
