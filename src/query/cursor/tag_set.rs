//! Tag-set cursor
//!
//! Merges the leaves of one series by time and re-chunks the rows at the
//! query's chunk size. Output chunks carry a single tag group (the series'
//! grouping key) and an interval index following the query windows.
//!
//! For raw queries LIMIT/OFFSET are applied here, per series. Once the
//! limit is reached the leaves are closed without being drained.

use std::sync::Arc;

use super::merge::Merger;
use super::{CursorItem, CursorState, KeyCursor, SeriesInfo};
use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;

/// Time-ordered merge of one series' leaves
pub struct TagSetCursor {
    state: CursorState,
    schema: Arc<RowDataType>,
    options: Arc<ProcessorOptions>,
    series: SeriesInfo,
    group: ChunkTags,
    merger: Merger,
    apply_limit: bool,
    skipped: usize,
    emitted: usize,
    last_window: Option<(i64, i64)>,
    done: bool,
}

impl TagSetCursor {
    /// Merge `leaves` of `series`; output rows are tagged with `group`
    ///
    /// `apply_limit` enables per-series LIMIT/OFFSET (raw queries only).
    pub fn new(
        leaves: Vec<Box<dyn KeyCursor>>,
        series: SeriesInfo,
        group: ChunkTags,
        schema: Arc<RowDataType>,
        options: Arc<ProcessorOptions>,
        apply_limit: bool,
    ) -> Self {
        let merger = Merger::new(leaves, options.ascending);
        Self {
            state: CursorState::new(),
            schema,
            options,
            series,
            group,
            merger,
            apply_limit,
            skipped: 0,
            emitted: 0,
            last_window: None,
            done: false,
        }
    }

    fn limit_reached(&self) -> bool {
        self.apply_limit && self.options.limit > 0 && self.emitted >= self.options.limit
    }

    /// Check the merge bookkeeping
    ///
    /// Fails when more leaves are buffered than exist, or when more rows
    /// were emitted than the limit allows.
    pub fn check_record_len(&self) -> Result<(), QueryError> {
        if self.merger.pending() > self.merger.len() {
            return Err(QueryError::internal(format!(
                "tag set cursor buffers {} heads for {} leaves",
                self.merger.pending(),
                self.merger.len()
            )));
        }
        if self.apply_limit && self.options.limit > 0 && self.emitted > self.options.limit {
            return Err(QueryError::internal(format!(
                "tag set cursor emitted {} rows over limit {}",
                self.emitted, self.options.limit
            )));
        }
        Ok(())
    }

    /// Rows emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

impl KeyCursor for TagSetCursor {
    fn name(&self) -> &'static str {
        "tag_set"
    }

    fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
        self.state.begin_next(self.name())?;
        if self.done || self.options.abort.is_cancelled() {
            return Ok(None);
        }

        let mut out = Chunk::new(self.options.name.clone(), self.schema.clone());
        let offset = if self.apply_limit { self.options.offset } else { 0 };
        let has_interval = self.options.has_interval();

        while out.len() < self.options.chunk_size && !self.limit_reached() {
            let options = &self.options;
            let group = &self.group;
            let skipped = &mut self.skipped;
            let emitted = &mut self.emitted;
            let last_window = &mut self.last_window;
            let more = self.merger.pop_into(|chunk, row| {
                if *skipped < offset {
                    *skipped += 1;
                    return;
                }
                let t = chunk.time()[row];
                let opened = out.open_tag_group(group);
                if has_interval {
                    let window = options.window(t);
                    if !opened && *last_window != Some(window) {
                        out.open_window();
                    }
                    *last_window = Some(window);
                }
                out.append_row_from(chunk, row);
                *emitted += 1;
            })?;
            if !more {
                self.done = true;
                break;
            }
            if self.options.abort.is_cancelled() {
                return Ok(None);
            }
        }

        if self.limit_reached() && !self.done {
            tracing::debug!(series = self.series.id, rows = self.emitted, "Series limit reached");
            self.done = true;
            self.merger.close();
        }
        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some((out, Some(self.series.clone()))))
    }

    fn close(&mut self) {
        if self.state.close() {
            self.merger.close();
            self.done = true;
        }
    }

    fn state(&self) -> &CursorState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cursor::SeriesCursor;
    use crate::query::options::Interval;
    use crate::query::schema::{DataType, Field, ValueRef};

    fn schema() -> Arc<RowDataType> {
        RowDataType::shared(vec![Field::new("v", DataType::Integer)])
    }

    fn series() -> SeriesInfo {
        SeriesInfo {
            id: 3,
            key: b"m,host=a,region=eu".to_vec(),
            tags: ChunkTags::parse("host=a,region=eu"),
        }
    }

    fn leaf(times: &[i64], options: &Arc<ProcessorOptions>) -> Box<dyn KeyCursor> {
        let mut c = Chunk::new("m", schema());
        for t in times {
            c.append_row(*t, &[Some(ValueRef::Integer(*t))]);
        }
        Box::new(SeriesCursor::new(c, series(), options.clone()))
    }

    fn cursor(options: ProcessorOptions, apply_limit: bool) -> TagSetCursor {
        let options = Arc::new(options);
        TagSetCursor::new(
            vec![leaf(&[1, 4, 7, 10], &options), leaf(&[2, 4, 8], &options)],
            series(),
            ChunkTags::parse("region=eu"),
            schema(),
            options,
            apply_limit,
        )
    }

    fn drain(c: &mut TagSetCursor) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some((chunk, _)) = c.next_chunk().unwrap() {
            chunk.validate().unwrap();
            out.push(chunk);
        }
        out
    }

    #[test]
    fn test_merge_and_rechunk() {
        let mut c = cursor(ProcessorOptions::new("m").with_chunk_size(3), false);
        let chunks = drain(&mut c);
        let times: Vec<i64> = chunks.iter().flat_map(|c| c.time().to_vec()).collect();
        assert_eq!(times, vec![1, 2, 4, 4, 7, 8, 10]);
        assert_eq!(chunks.iter().map(Chunk::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(chunks[0].tags(), &[ChunkTags::parse("region=eu")]);
        c.check_record_len().unwrap();
    }

    #[test]
    fn test_interval_index_follows_windows() {
        let options = ProcessorOptions::new("m").with_interval(Interval::from_nanos(5, 0));
        let mut c = cursor(options, false);
        let chunks = drain(&mut c);
        assert_eq!(chunks.len(), 1);
        // windows [0,5) [5,10) [10,15)
        assert_eq!(chunks[0].interval_index(), &[0, 4, 6]);
    }

    #[test]
    fn test_limit_offset_per_series() {
        for (limit, offset, expected) in [
            (2, 1, vec![2, 4]),
            (10, 5, vec![8, 10]),
            (3, 9, vec![]),
            (0, 2, vec![4, 4, 7, 8, 10]),
        ] {
            let options = ProcessorOptions::new("m")
                .with_chunk_size(2)
                .with_limit(limit, offset);
            let mut c = cursor(options, true);
            let times: Vec<i64> = drain(&mut c).iter().flat_map(|c| c.time().to_vec()).collect();
            assert_eq!(times, expected, "limit {} offset {}", limit, offset);
            c.check_record_len().unwrap();
        }
    }

    #[test]
    fn test_limit_ignored_for_aggregate_input() {
        let options = ProcessorOptions::new("m").with_limit(1, 0);
        let mut c = cursor(options, false);
        let rows: usize = drain(&mut c).iter().map(Chunk::len).sum();
        assert_eq!(rows, 7);
    }

    #[test]
    fn test_descending() {
        let mut c = cursor(ProcessorOptions::new("m").with_ascending(false), false);
        let times: Vec<i64> = drain(&mut c).iter().flat_map(|c| c.time().to_vec()).collect();
        assert_eq!(times, vec![10, 8, 7, 4, 4, 2, 1]);
    }
}
