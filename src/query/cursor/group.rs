//! Group cursor
//!
//! Top of one partition's cursor tree. Children are grouped by their
//! grouping key and the groups are emitted one after the other, in the
//! order given. Children of the same group are merged by time, so a group
//! appears once per partition as one contiguous tag group.
//!
//! Children always yield raw rows; aggregation, when done in the cursors,
//! wraps the group cursor so a group's windows cover all of its series.

use std::collections::VecDeque;
use std::sync::Arc;

use super::merge::Merger;
use super::{CursorItem, CursorState, KeyCursor};
use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;

/// Children sharing one grouping key
pub type CursorGroup = (ChunkTags, Vec<Box<dyn KeyCursor>>);

/// Concatenation of groups, time merge inside each group
pub struct GroupCursor {
    state: CursorState,
    schema: Arc<RowDataType>,
    options: Arc<ProcessorOptions>,
    groups: VecDeque<CursorGroup>,
    current: Option<(ChunkTags, Merger)>,
    last_window: Option<(i64, i64)>,
    series: usize,
}

impl GroupCursor {
    /// Cursor emitting `groups` in order
    pub fn new(
        groups: Vec<CursorGroup>,
        schema: Arc<RowDataType>,
        options: Arc<ProcessorOptions>,
    ) -> Self {
        let series = groups.iter().map(|(_, c)| c.len()).sum();
        Self {
            state: CursorState::new(),
            schema,
            options,
            groups: groups.into(),
            current: None,
            last_window: None,
            series,
        }
    }

    /// Number of child cursors
    pub fn series_count(&self) -> usize {
        self.series
    }
}

impl KeyCursor for GroupCursor {
    fn name(&self) -> &'static str {
        "group"
    }

    fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
        self.state.begin_next(self.name())?;
        let mut out = Chunk::new(self.options.name.clone(), self.schema.clone());
        let has_interval = self.options.has_interval();

        while out.len() < self.options.chunk_size {
            if self.options.abort.is_cancelled() {
                return Ok(None);
            }
            if self.current.is_none() {
                match self.groups.pop_front() {
                    Some((tags, children)) => {
                        self.current = Some((tags, Merger::new(children, self.options.ascending)));
                        self.last_window = None;
                    }
                    None => break,
                }
            }
            let Some((tags, merger)) = self.current.as_mut() else {
                break;
            };

            let options = &self.options;
            let last_window = &mut self.last_window;
            let more = merger.pop_into(|chunk, row| {
                let t = chunk.time()[row];
                let opened = out.open_tag_group(tags);
                if has_interval {
                    let window = options.window(t);
                    if !opened && *last_window != Some(window) {
                        out.open_window();
                    }
                    *last_window = Some(window);
                }
                out.append_row_from(chunk, row);
            })?;
            if !more {
                merger.close();
                self.current = None;
            }
        }

        if out.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            rows = out.len(),
            tag_groups = out.tags().len(),
            "Group cursor chunk"
        );
        Ok(Some((out, None)))
    }

    fn close(&mut self) {
        if !self.state.close() {
            return;
        }
        if let Some((_, mut merger)) = self.current.take() {
            merger.close();
        }
        for (_, children) in &mut self.groups {
            for child in children {
                child.close();
            }
        }
        self.groups.clear();
        tracing::debug!(series = self.series, "Group cursor closed");
    }

    fn state(&self) -> &CursorState {
        &self.state
    }
}
