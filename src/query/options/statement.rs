//! Statement-to-options derivation
//!
//! Pure functions turning a parsed SELECT statement (and, for subqueries,
//! the parent's options) into `ProcessorOptions`. No I/O.

use tokio_util::sync::CancellationToken;

use super::{FillOption, Interval, ProcessorOptions};
use crate::query::condition::Condition;
use crate::types::{MAX_TIME, MIN_TIME};
use chrono::FixedOffset;

/// Time bounds extracted from a WHERE clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeCondition {
    /// Inclusive lower bound
    pub min: Option<i64>,
    /// Exclusive upper bound
    pub max: Option<i64>,
}

/// The parts of a parsed SELECT statement the executor cares about
#[derive(Debug, Clone)]
pub struct SelectStatement {
    /// Source measurement
    pub measurement: String,
    /// GROUP BY tag keys
    pub dimensions: Vec<String>,
    /// `GROUP BY *`
    pub group_by_all_dims: bool,
    /// GROUP BY time interval (negative durations mean "none")
    pub interval: Option<Interval>,
    /// Fill policy
    pub fill: FillOption,
    /// `INTO` destination measurement
    pub target: Option<String>,
    /// LIMIT
    pub limit: usize,
    /// OFFSET
    pub offset: usize,
    /// SLIMIT
    pub slimit: usize,
    /// SOFFSET
    pub soffset: usize,
    /// Time bounds from the WHERE clause
    pub time_condition: TimeCondition,
    /// Remaining (non-time) WHERE clause
    pub condition: Option<Condition>,
    /// ORDER BY time ASC
    pub ascending: bool,
    /// Statement selects raw fields (no aggregate calls)
    pub is_raw: bool,
    /// `tz()` clause
    pub location: Option<FixedOffset>,
}

impl SelectStatement {
    /// Raw ascending statement over `measurement`
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            dimensions: Vec::new(),
            group_by_all_dims: false,
            interval: None,
            fill: FillOption::Null,
            target: None,
            limit: 0,
            offset: 0,
            slimit: 0,
            soffset: 0,
            time_condition: TimeCondition::default(),
            condition: None,
            ascending: true,
            is_raw: true,
            location: None,
        }
    }

    fn effective_interval(&self) -> Interval {
        match self.interval {
            Some(iv) if iv.duration > 0 => iv,
            _ => Interval::default(),
        }
    }
}

impl ProcessorOptions {
    /// Derive top-level options from a statement
    ///
    /// Unbounded times default to the global sentinels, negative intervals
    /// become zero, and a NULL fill degrades to NONE when the statement
    /// writes into a target measurement.
    pub fn from_statement(
        stmt: &SelectStatement,
        chunk_size: usize,
        abort: CancellationToken,
    ) -> ProcessorOptions {
        let mut fill = stmt.fill;
        if fill == FillOption::Null && stmt.target.is_some() {
            fill = FillOption::None;
        }

        let mut opt = ProcessorOptions::new(stmt.measurement.clone())
            .with_time_range(
                stmt.time_condition.min.unwrap_or(MIN_TIME),
                stmt.time_condition.max.unwrap_or(MAX_TIME),
            )
            .with_interval(stmt.effective_interval())
            .with_dimensions(stmt.dimensions.iter().cloned())
            .with_group_by_all_dims(stmt.group_by_all_dims)
            .with_fill(fill)
            .with_ascending(stmt.ascending)
            .with_ordered(true)
            .with_limit(stmt.limit, stmt.offset)
            .with_slimit(stmt.slimit, stmt.soffset)
            .with_chunk_size(chunk_size)
            .with_abort(abort);
        opt.location = stmt.location;
        opt.condition = stmt.condition.clone();
        opt
    }

    /// Derive options for a subquery of `parent`
    ///
    /// - the time range is clamped to the parent's (never widened)
    /// - dimensions and group-by are unioned with the parent's
    /// - SLIMIT/SOFFSET add up
    /// - ordering, chunk size and the abort token are inherited
    /// - a NULL fill degrades to NONE for non-raw subqueries
    /// - a subquery without interval inherits the parent interval
    /// - with an interval and no upper bound, the end is pinned to `now`
    pub fn derive_subquery(
        parent: &ProcessorOptions,
        stmt: &SelectStatement,
        now: i64,
    ) -> ProcessorOptions {
        let mut sub =
            ProcessorOptions::from_statement(stmt, parent.chunk_size, parent.abort.clone());

        sub.start_time = sub.start_time.max(parent.start_time);
        sub.end_time = sub.end_time.min(parent.end_time);
        if sub.has_interval() && sub.end_time == MAX_TIME {
            sub.end_time = now;
        }
        // disjoint ranges collapse to an empty range inside the parent's
        sub.start_time = sub.start_time.min(parent.end_time);
        if sub.end_time < sub.start_time {
            sub.end_time = sub.start_time;
        }

        let child_dims = std::mem::take(&mut sub.dimensions);
        sub.group_by.clear();
        sub = sub.with_dimensions(parent.dimensions.iter().cloned().chain(child_dims));
        sub.group_by_all_dims |= parent.group_by_all_dims;

        sub.slimit += parent.slimit;
        sub.soffset += parent.soffset;

        sub.ascending = parent.ascending;
        sub.ordered = parent.ordered;

        if !stmt.is_raw && sub.fill == FillOption::Null {
            sub.fill = FillOption::None;
        }

        if stmt.effective_interval().is_zero() {
            sub.interval = parent.interval;
        }

        tracing::debug!(
            measurement = %sub.name,
            start = sub.start_time,
            end = sub.end_time,
            slimit = sub.slimit,
            "derived subquery options"
        );
        sub
    }
}
