//! Processor options
//!
//! The configuration object threaded through every stage of a query: time
//! range, grouping, window interval, fill policy, ordering, limits, chunk
//! size, filter condition and the abort token. Built once per (sub)query,
//! then shared read-only (usually behind the `QuerySchema`'s `Arc`).

pub mod statement;
pub mod window;

pub use statement::{SelectStatement, TimeCondition};
pub use window::{window, Interval};

use std::collections::BTreeSet;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::query::condition::Condition;
use crate::query::error::QueryError;
use crate::types::{MAX_TIME, MIN_TIME, NANOS_PER_SECOND};

/// Default number of rows per emitted chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

// ============================================================================
// Fill Policy
// ============================================================================

/// How gaps between emitted windows are filled downstream
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum FillOption {
    /// Emit NULL for empty windows
    #[default]
    Null,
    /// Emit nothing for empty windows
    None,
    /// Emit a constant
    Number(f64),
    /// Repeat the previous value
    Previous,
    /// Interpolate linearly
    Linear,
}

// ============================================================================
// Processor Options
// ============================================================================

/// Immutable per-query execution options
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Source measurement
    pub name: String,
    /// Inclusive lower time bound
    pub start_time: i64,
    /// Exclusive upper time bound
    pub end_time: i64,
    /// GROUP BY time interval
    pub interval: Interval,
    /// Time zone applied to window boundaries
    pub location: Option<FixedOffset>,
    /// Grouping dimensions in statement order
    pub dimensions: Vec<String>,
    /// Grouping dimensions as a set (order irrelevant)
    pub group_by: BTreeSet<String>,
    /// `GROUP BY *`
    pub group_by_all_dims: bool,
    /// Fill policy
    pub fill: FillOption,
    /// Time order of every output stream
    pub ascending: bool,
    /// Fan-in points must impose a total time order
    pub ordered: bool,
    /// Rows per series (0 = unlimited)
    pub limit: usize,
    /// Rows skipped per series
    pub offset: usize,
    /// Series limit (0 = unlimited)
    pub slimit: usize,
    /// Series skipped
    pub soffset: usize,
    /// Rows per emitted chunk
    pub chunk_size: usize,
    /// Filter condition
    pub condition: Option<Condition>,
    /// Abort signal observed by every blocking operation
    pub abort: CancellationToken,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            start_time: MIN_TIME,
            end_time: MAX_TIME,
            interval: Interval::default(),
            location: None,
            dimensions: Vec::new(),
            group_by: BTreeSet::new(),
            group_by_all_dims: false,
            fill: FillOption::Null,
            ascending: true,
            ordered: true,
            limit: 0,
            offset: 0,
            slimit: 0,
            soffset: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            condition: None,
            abort: CancellationToken::new(),
        }
    }
}

impl ProcessorOptions {
    /// Options for measurement `name` with defaults everywhere else
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the time range `[start, end)`
    pub fn with_time_range(mut self, start: i64, end: i64) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Set the GROUP BY interval
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Set a fixed time zone for windows
    pub fn with_location(mut self, location: FixedOffset) -> Self {
        self.location = Some(location);
        self
    }

    /// Set grouping dimensions (list and set)
    pub fn with_dimensions<I, S>(mut self, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for d in dims {
            let d = d.into();
            if self.group_by.insert(d.clone()) {
                self.dimensions.push(d);
            }
        }
        self
    }

    /// Group by every tag key
    pub fn with_group_by_all_dims(mut self, all: bool) -> Self {
        self.group_by_all_dims = all;
        self
    }

    /// Set the fill policy
    pub fn with_fill(mut self, fill: FillOption) -> Self {
        self.fill = fill;
        self
    }

    /// Set time ordering
    pub fn with_ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    /// Set whether fan-in must be time ordered
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Set per-series limit and offset
    pub fn with_limit(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Set series limit and offset
    pub fn with_slimit(mut self, slimit: usize, soffset: usize) -> Self {
        self.slimit = slimit;
        self.soffset = soffset;
        self
    }

    /// Set rows per emitted chunk
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the filter condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Use an externally owned abort token
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Planning-time setter for the ordering
    pub fn set_ascending(&mut self, ascending: bool) {
        self.ascending = ascending;
    }

    // ------------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------------

    /// Window `[start, end)` containing `t`
    pub fn window(&self, t: i64) -> (i64, i64) {
        window(
            t,
            self.interval,
            self.location.as_ref(),
            self.start_time,
            self.end_time,
        )
    }

    /// True when a GROUP BY interval is set
    pub fn has_interval(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Where iteration starts: start time ascending, end time descending
    pub fn seek_time(&self) -> i64 {
        if self.ascending {
            self.start_time
        } else {
            self.end_time
        }
    }

    /// Where iteration stops: end time ascending, start time descending
    pub fn stop_time(&self) -> i64 {
        if self.ascending {
            self.end_time
        } else {
            self.start_time
        }
    }

    /// Default unit of derivative-family functions: the interval or 1s
    pub fn derivative_interval(&self) -> i64 {
        if self.interval.duration > 0 {
            self.interval.duration
        } else {
            NANOS_PER_SECOND
        }
    }

    /// Default unit of `elapsed`: 1ns
    pub fn elapsed_interval(&self) -> i64 {
        1
    }

    /// Default unit of `integral`: 1s
    pub fn integral_interval(&self) -> i64 {
        NANOS_PER_SECOND
    }

    /// True when any grouping is requested
    pub fn is_grouped(&self) -> bool {
        self.group_by_all_dims || !self.group_by.is_empty()
    }

    /// Dimensions used to form tag groups
    ///
    /// `GROUP BY *` overrides an explicit dimension list; both being set is a
    /// compatibility risk and logged.
    pub fn effective_dimensions(&self, all_tag_keys: &[String]) -> Vec<String> {
        if self.group_by_all_dims {
            if !self.dimensions.is_empty() {
                tracing::warn!(
                    measurement = %self.name,
                    dimensions = ?self.dimensions,
                    "group by all dims overrides explicit dimensions"
                );
            }
            let mut keys = all_tag_keys.to_vec();
            keys.sort();
            keys.dedup();
            return keys;
        }
        self.dimensions.clone()
    }

    /// Check the options before any stage is built
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.chunk_size == 0 {
            return Err(QueryError::validation("chunk size must be positive"));
        }
        if self.start_time > self.end_time {
            return Err(QueryError::validation(format!(
                "start time {} is after end time {}",
                self.start_time, self.end_time
            )));
        }
        if self.interval.duration < 0 {
            return Err(QueryError::validation("interval must not be negative"));
        }
        if self.has_interval()
            && (self.interval.offset < 0 || self.interval.offset >= self.interval.duration)
        {
            return Err(QueryError::validation(format!(
                "interval offset {} outside [0, {})",
                self.interval.offset, self.interval.duration
            )));
        }
        if !self.group_by.is_empty() && self.dimensions.is_empty() {
            return Err(QueryError::validation(
                "group by requested without dimensions",
            ));
        }
        if self.group_by.len() != self.dimensions.len()
            || self.dimensions.iter().any(|d| !self.group_by.contains(d))
        {
            return Err(QueryError::validation(
                "dimension list and group by set disagree",
            ));
        }
        Ok(())
    }
}
