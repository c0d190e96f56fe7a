//! Aggregate cursor
//!
//! The streaming aggregation driven by pulls instead of port receives:
//! every `next_chunk` reads from the wrapped cursor until the aggregator
//! has a finished chunk or the input is exhausted. The shard wraps one
//! partition's group cursor, so every series of a group lands in the same
//! windows.

use std::sync::Arc;

use super::{CursorItem, CursorState, KeyCursor};
use crate::query::aggregate::StreamAggregator;
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::query_schema::QuerySchema;
use crate::query::schema::RowDataType;

/// Pull-driven aggregation of one input cursor
pub struct AggregateCursor {
    state: CursorState,
    input: Box<dyn KeyCursor>,
    aggregator: StreamAggregator,
    schema: Arc<RowDataType>,
    options: Arc<ProcessorOptions>,
    finished: bool,
}

impl AggregateCursor {
    /// Aggregate `input` with the calls of `schema`
    ///
    /// Castor calls need the async worker and are only supported by the
    /// pipeline transform.
    pub fn new(input: Box<dyn KeyCursor>, schema: &QuerySchema) -> Result<Self, QueryError> {
        if schema.is_castor() {
            return Err(QueryError::planning(
                "castor() is only supported by the pipeline aggregate transform",
            ));
        }
        let aggregator = StreamAggregator::new(schema)?;
        Ok(Self {
            state: CursorState::new(),
            schema: aggregator.output_schema().clone(),
            input,
            aggregator,
            options: schema.options().clone(),
            finished: false,
        })
    }
}

impl KeyCursor for AggregateCursor {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
        self.state.begin_next(self.name())?;
        loop {
            if self.options.abort.is_cancelled() {
                return Ok(None);
            }
            if let Some(chunk) = self.aggregator.pop_ready() {
                return Ok(Some((chunk, None)));
            }
            if self.finished {
                return Ok(None);
            }
            match self.input.next_chunk()? {
                Some((chunk, _)) => self.aggregator.push(&chunk)?,
                None => {
                    self.aggregator.finish()?;
                    self.aggregator.flush();
                    self.finished = true;
                }
            }
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
            self.finished = true;
        }
    }

    fn state(&self) -> &CursorState {
        &self.state
    }
}
