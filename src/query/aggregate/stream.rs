//! Streaming aggregation
//!
//! `StreamAggregator` is the push-driven core shared by the pipeline
//! transform and the aggregate cursor. Chunks are pushed in stream order;
//! finished output chunks are queued and popped by the driver.
//!
//! A window is identified by its tag set and its `[start, end)` bounds. A
//! window may span several input chunks: the first span of a chunk
//! continues the open window when both the tags and the computed window
//! match. Inside one chunk the interval index is authoritative.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use super::carry::CarryReducer;
use super::castor::CastorJob;
use super::reducer::{
    AuxRows, Finalized, Point, ReducerContext, SpanInput, WindowEnd, WindowReducer,
};
use super::{AggregatePlan, CallKind};
use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::query_schema::QuerySchema;
use crate::query::schema::{RowDataType, Value, ValueRef};
use crate::types::NANOS_PER_SECOND;

enum Reducers {
    Windowed(Vec<WindowReducer>),
    Carry(Vec<CarryReducer>),
}

/// Window currently accumulating
#[derive(Debug)]
struct OpenWindow {
    tags: ChunkTags,
    window: (i64, i64),
    /// First row time of the most recent segment of this window
    segment_time: i64,
    /// Non-windowed output: the next emitted row starts an output window
    pending_window: bool,
}

/// Push-driven aggregation of one input stream
pub struct StreamAggregator {
    plan: Arc<AggregatePlan>,
    options: Arc<ProcessorOptions>,
    input: Arc<RowDataType>,
    ctx: ReducerContext,
    reducers: Reducers,
    current: Option<OpenWindow>,
    name: String,
    out: Chunk,
    ready: VecDeque<Chunk>,
    castor_jobs: Vec<CastorJob>,
}

impl StreamAggregator {
    /// Aggregator for the calls of `schema`
    pub fn new(schema: &QuerySchema) -> Result<Self, QueryError> {
        let plan = schema
            .plan()
            .cloned()
            .ok_or_else(|| QueryError::planning("query has no aggregate calls"))?;
        let options = schema.options().clone();

        let ctx = ReducerContext {
            ascending: options.ascending,
            rate_unit: if options.has_interval() {
                options.interval.duration
            } else {
                NANOS_PER_SECOND
            },
            capture_aux: !plan.aux.is_empty(),
        };

        let reducers = if plan.windowed {
            Reducers::Windowed(
                plan.calls
                    .iter()
                    .map(|c| WindowReducer::new(c, &ctx))
                    .collect(),
            )
        } else {
            let unit = options.derivative_interval();
            let carry = plan
                .calls
                .iter()
                .map(|c| {
                    CarryReducer::new(c, unit, options.ascending).ok_or_else(|| {
                        QueryError::internal(format!("{}() is windowed", c.call.kind.name()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Reducers::Carry(carry)
        };

        let name = options.name.clone();
        let out = Chunk::new(name.clone(), plan.output.clone());
        Ok(Self {
            input: schema.source().clone(),
            plan,
            options,
            ctx,
            reducers,
            current: None,
            name,
            out,
            ready: VecDeque::new(),
            castor_jobs: Vec::new(),
        })
    }

    /// Schema of the produced chunks
    pub fn output_schema(&self) -> &Arc<RowDataType> {
        &self.plan.output
    }

    /// Feed one input chunk
    pub fn push(&mut self, chunk: &Chunk) -> Result<(), QueryError> {
        if !chunk.schema().is_compatible(&self.input) {
            return Err(QueryError::internal(format!(
                "chunk {} does not match the aggregation input schema",
                chunk.name()
            )));
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.name = chunk.name().to_string();

        let groups: Vec<(ChunkTags, Range<usize>)> = if chunk.tags().is_empty() {
            vec![(ChunkTags::default(), 0..chunk.len())]
        } else {
            chunk.tag_spans().map(|(t, r)| (t.clone(), r)).collect()
        };

        let times = chunk.time();
        for (tags, range) in groups {
            for (k, span) in chunk.window_spans(range).into_iter().enumerate() {
                let first = times[span.start];
                let key = self.options.window(first);
                let continues = k == 0
                    && self
                        .current
                        .as_ref()
                        .is_some_and(|c| c.tags == tags && c.window == key);
                if continues {
                    if let Some(open) = self.current.as_mut() {
                        open.segment_time = first;
                    }
                } else {
                    self.start_window(chunk, &tags, key, &span)?;
                }
                self.accumulate(chunk, &tags, &span)?;
            }
        }
        Ok(())
    }

    /// Close the open window at end of stream
    pub fn finish(&mut self) -> Result<(), QueryError> {
        if let Some(open) = self.current.take() {
            if self.plan.windowed {
                let ends = vec![WindowEnd::default(); self.plan.calls.len()];
                self.close_window(open, &ends)?;
            }
        }
        Ok(())
    }

    /// Queue the partially filled output chunk
    pub fn flush(&mut self) {
        if self.out.is_empty() {
            return;
        }
        let next = Chunk::new(self.name.clone(), self.plan.output.clone());
        let full = std::mem::replace(&mut self.out, next);
        tracing::debug!(
            rows = full.len(),
            tag_groups = full.tags().len(),
            "Aggregate chunk ready"
        );
        self.ready.push_back(full);
    }

    /// Next finished output chunk
    pub fn pop_ready(&mut self) -> Option<Chunk> {
        self.ready.pop_front()
    }

    /// Windows waiting for the castor worker, in stream order
    pub fn take_castor_jobs(&mut self) -> Vec<CastorJob> {
        std::mem::take(&mut self.castor_jobs)
    }

    /// Append the series returned by the worker for `job`
    pub fn apply_castor(
        &mut self,
        job: &CastorJob,
        points: Vec<(i64, f64)>,
    ) -> Result<(), QueryError> {
        for (i, (time, value)) in points.into_iter().enumerate() {
            self.append_output_row(&job.tags, i == 0, time, vec![Some(Value::Float(value))])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Windows
    // ------------------------------------------------------------------------

    fn start_window(
        &mut self,
        chunk: &Chunk,
        tags: &ChunkTags,
        key: (i64, i64),
        span: &Range<usize>,
    ) -> Result<(), QueryError> {
        let previous = self.current.take();
        let same_tags = previous.as_ref().is_some_and(|p| p.tags == *tags);

        if self.plan.windowed {
            if let Some(prev) = previous {
                let ends = if same_tags {
                    self.window_ends(&prev, chunk, span)
                } else {
                    vec![WindowEnd::default(); self.plan.calls.len()]
                };
                self.close_window(prev, &ends)?;
            }
        } else if !same_tags {
            if let Reducers::Carry(reducers) = &mut self.reducers {
                reducers.iter_mut().for_each(CarryReducer::reset);
            }
        }

        self.current = Some(OpenWindow {
            tags: tags.clone(),
            window: key,
            segment_time: chunk.time()[span.start],
            pending_window: true,
        });
        Ok(())
    }

    /// Lookahead for reducers that integrate across the window edge
    fn window_ends(&self, prev: &OpenWindow, chunk: &Chunk, span: &Range<usize>) -> Vec<WindowEnd> {
        let boundary = self.options.has_interval().then_some(if self.ctx.ascending {
            prev.window.1
        } else {
            prev.window.0
        });
        let Reducers::Windowed(reducers) = &self.reducers else {
            return Vec::new();
        };
        self.plan
            .calls
            .iter()
            .zip(reducers)
            .map(|(call, reducer)| {
                if boundary.is_none() || !reducer.needs_lookahead() {
                    return WindowEnd::default();
                }
                let lookahead = chunk
                    .column(call.source_index)
                    .iter_range(span.clone())
                    .find_map(|(row, v)| {
                        v.and_then(|v| v.as_f64()).map(|x| (chunk.time()[row], x))
                    });
                WindowEnd { lookahead, boundary }
            })
            .collect()
    }

    fn accumulate(
        &mut self,
        chunk: &Chunk,
        tags: &ChunkTags,
        span: &Range<usize>,
    ) -> Result<(), QueryError> {
        let plan = self.plan.clone();
        let aux = AuxRows {
            chunk,
            columns: &plan.aux,
        };

        match &mut self.reducers {
            Reducers::Windowed(reducers) => {
                for (call, reducer) in plan.calls.iter().zip(reducers.iter_mut()) {
                    let input = SpanInput {
                        column: chunk.column(call.source_index),
                        times: chunk.time(),
                        rows: span.clone(),
                        aux,
                    };
                    reducer.update(&input, &self.ctx);
                }
                Ok(())
            }
            Reducers::Carry(reducers) => {
                let width = plan.calls.len();
                let mut rows: BTreeMap<usize, Vec<Option<Value>>> = BTreeMap::new();
                for (i, (call, reducer)) in plan.calls.iter().zip(reducers.iter_mut()).enumerate() {
                    let input = SpanInput {
                        column: chunk.column(call.source_index),
                        times: chunk.time(),
                        rows: span.clone(),
                        aux,
                    };
                    reducer.update(&input, &mut |row, value| {
                        rows.entry(row).or_insert_with(|| vec![None; width])[i] = Some(value);
                    });
                }

                let times = chunk.time();
                for (row, values) in rows {
                    let new_window = self
                        .current
                        .as_mut()
                        .is_some_and(|c| std::mem::take(&mut c.pending_window));
                    self.append_output_row(tags, new_window, times[row], values)?;
                }
                Ok(())
            }
        }
    }

    fn close_window(&mut self, window: OpenWindow, ends: &[WindowEnd]) -> Result<(), QueryError> {
        let Reducers::Windowed(reducers) = &mut self.reducers else {
            return Ok(());
        };
        let ctx = self.ctx;
        let mut results: Vec<Finalized> = reducers
            .iter_mut()
            .zip(ends)
            .map(|(r, end)| r.finalize(*end, &ctx))
            .collect();

        if self.plan.is_castor() {
            let plan = self.plan.clone();
            for (call, result) in plan.calls.iter().zip(results) {
                if let (
                    CallKind::Castor {
                        algorithm,
                        config,
                        process_type,
                    },
                    Finalized::Castor(series),
                ) = (&call.call.kind, result)
                {
                    if !series.is_empty() {
                        self.castor_jobs.push(CastorJob {
                            tags: window.tags.clone(),
                            window: window.window,
                            series,
                            algorithm: algorithm.clone(),
                            config: config.clone(),
                            process_type: process_type.clone(),
                        });
                    }
                }
            }
            return Ok(());
        }

        if results.len() == 1 {
            match results.pop() {
                Some(Finalized::Selected(point)) if self.plan.selector_mode => {
                    if let Some(point) = point {
                        self.append_point(&window.tags, true, point)?;
                    }
                    return Ok(());
                }
                Some(Finalized::Points(points)) => {
                    for (i, point) in points.into_iter().enumerate() {
                        self.append_point(&window.tags, i == 0, point)?;
                    }
                    return Ok(());
                }
                Some(other) => results.push(other),
                None => {}
            }
        }

        let values: Vec<Option<Value>> = results
            .into_iter()
            .map(|r| match r {
                Finalized::Value(v) => v,
                Finalized::Selected(p) => p.map(|p| p.value),
                Finalized::Points(_) | Finalized::Castor(_) => None,
            })
            .collect();
        if values.iter().all(Option::is_none) {
            return Ok(());
        }
        self.append_output_row(&window.tags, true, window.segment_time, values)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    fn append_point(
        &mut self,
        tags: &ChunkTags,
        new_window: bool,
        point: Point,
    ) -> Result<(), QueryError> {
        let mut values = Vec::with_capacity(1 + point.aux.len());
        values.push(Some(point.value));
        values.extend(point.aux);
        self.append_output_row(tags, new_window, point.time, values)
    }

    fn append_output_row(
        &mut self,
        tags: &ChunkTags,
        new_window: bool,
        time: i64,
        values: Vec<Option<Value>>,
    ) -> Result<(), QueryError> {
        let fields = self.plan.output.fields();
        if values.len() != fields.len() {
            return Err(QueryError::internal(format!(
                "aggregate row has {} values for {} columns",
                values.len(),
                fields.len()
            )));
        }
        for (value, field) in values.iter().zip(fields) {
            if let Some(value) = value {
                if value.data_type() != field.data_type {
                    return Err(QueryError::internal(format!(
                        "{} produced a {} value for a {} column",
                        field.name,
                        value.data_type(),
                        field.data_type
                    )));
                }
            }
        }

        if self.out.is_empty() {
            self.out.set_name(self.name.clone());
        }
        let opened = self.out.open_tag_group(tags);
        if new_window && !opened {
            self.out.open_window();
        }
        let refs: Vec<Option<ValueRef<'_>>> = values
            .iter()
            .map(|v| v.as_ref().map(Value::as_value_ref))
            .collect();
        self.out.append_row(time, &refs);

        if self.out.len() >= self.options.chunk_size {
            self.flush();
        }
        Ok(())
    }
}
