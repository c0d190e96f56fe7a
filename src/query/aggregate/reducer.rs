//! Windowed reducers
//!
//! One reducer per (tag group, call). A reducer accumulates every span of
//! its current window, possibly across several chunks, and is finalized
//! once when the window closes. Dispatch is a closed enum resolved at
//! planning time; rows never go through a name lookup.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Range;

use rand::Rng;

use super::numeric::{interpolate, KahanSum, WelfordState};
use super::{BoundCall, CallKind};
use crate::query::chunk::{Chunk, Column};
use crate::query::schema::{compare_values, DataType, Value, ValueRef};
use crate::types::NANOS_PER_SECOND;

// ============================================================================
// Reducer inputs and outputs
// ============================================================================

/// A selected or emitted row
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Point {
    pub time: i64,
    pub value: Value,
    /// Auxiliary column values of the input row (selector mode only)
    pub aux: Vec<Option<Value>>,
}

/// Auxiliary columns of the chunk being reduced
#[derive(Clone, Copy)]
pub(crate) struct AuxRows<'a> {
    pub chunk: &'a Chunk,
    pub columns: &'a [usize],
}

impl AuxRows<'_> {
    fn capture(&self, row: usize) -> Vec<Option<Value>> {
        self.columns
            .iter()
            .map(|&c| self.chunk.column(c).value(row).map(|v| v.to_owned_value()))
            .collect()
    }
}

/// Rows of one window segment for one call
pub(crate) struct SpanInput<'a> {
    pub column: &'a Column,
    pub times: &'a [i64],
    pub rows: Range<usize>,
    pub aux: AuxRows<'a>,
}

impl<'a> SpanInput<'a> {
    fn values(&self) -> impl Iterator<Item = (usize, i64, ValueRef<'a>)> + '_ {
        let times = self.times;
        self.column
            .iter_range(self.rows.clone())
            .filter_map(move |(row, v)| v.map(|v| (row, times[row], v)))
    }
}

/// How the window being finalized ends
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WindowEnd {
    /// First point of the next window of the same tag group
    pub lookahead: Option<(i64, f64)>,
    /// Window edge crossed toward the next window
    pub boundary: Option<i64>,
}

/// Result of finalizing one window
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Finalized {
    /// Aggregate without a time of its own
    Value(Option<Value>),
    /// Selected input row
    Selected(Option<Point>),
    /// Several rows
    Points(Vec<Point>),
    /// Batch to delegate to the castor worker
    Castor(Vec<(i64, f64)>),
}

/// Settings shared by every reducer of one transform
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReducerContext {
    pub ascending: bool,
    /// Unit of rate/irate: the interval, or 1s
    pub rate_unit: i64,
    pub capture_aux: bool,
}

// ============================================================================
// Value ordering helper
// ============================================================================

/// `Value` with the total order of `compare_values`
#[derive(Debug, Clone)]
pub(crate) struct OrdValue(Value);

impl PartialEq for OrdValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdValue {}

impl PartialOrd for OrdValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdValue {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0.as_value_ref(), &other.0.as_value_ref())
    }
}

// ============================================================================
// Reducers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectMode {
    Min,
    Max,
    First,
    Last,
}

#[derive(Debug, Default)]
pub(crate) struct IntegralState {
    unit: i64,
    prev: Option<(i64, f64)>,
    area: f64,
    seen: bool,
}

/// Accumulator of one windowed call
#[derive(Debug)]
pub(crate) enum WindowReducer {
    Count(i64),
    SumInteger(Option<i64>),
    SumFloat(Option<KahanSum>),
    Mean { sum: KahanSum, n: u64 },
    Select { mode: SelectMode, best: Option<Point> },
    Spread { min: Option<Value>, max: Option<Value> },
    Stddev(WelfordState),
    Median(Vec<Point>),
    /// Count and first row of every distinct value
    Mode(BTreeMap<OrdValue, (usize, Point)>),
    Percentile { p: f64, points: Vec<Point> },
    Extreme { n: usize, top: bool, points: Vec<Point> },
    Distinct(BTreeMap<OrdValue, (i64, Vec<Option<Value>>)>),
    Sample { n: usize, seen: usize, points: Vec<Point> },
    Absent(bool),
    Rate {
        irate: bool,
        unit: i64,
        first: Option<(i64, f64)>,
        prev: Option<(i64, f64)>,
        last: Option<(i64, f64)>,
    },
    Elapsed { unit: i64, prev: Option<i64>, points: Vec<Point> },
    Integral(IntegralState),
    Castor(Vec<(i64, f64)>),
}

impl WindowReducer {
    /// Fresh reducer for `call`
    ///
    /// Non-windowed calls never reach this constructor.
    pub(crate) fn new(call: &BoundCall, ctx: &ReducerContext) -> Self {
        match &call.call.kind {
            CallKind::Count => WindowReducer::Count(0),
            CallKind::Sum => match call.source_type {
                DataType::Integer => WindowReducer::SumInteger(None),
                _ => WindowReducer::SumFloat(None),
            },
            CallKind::Mean => WindowReducer::Mean {
                sum: KahanSum::new(),
                n: 0,
            },
            CallKind::Min => select(SelectMode::Min),
            CallKind::Max => select(SelectMode::Max),
            CallKind::First => select(SelectMode::First),
            CallKind::Last => select(SelectMode::Last),
            CallKind::Spread => WindowReducer::Spread {
                min: None,
                max: None,
            },
            CallKind::Stddev => WindowReducer::Stddev(WelfordState::new()),
            CallKind::Median => WindowReducer::Median(Vec::new()),
            CallKind::Mode => WindowReducer::Mode(BTreeMap::new()),
            CallKind::Percentile(p) => WindowReducer::Percentile {
                p: *p,
                points: Vec::new(),
            },
            CallKind::Top(n) => WindowReducer::Extreme {
                n: *n,
                top: true,
                points: Vec::new(),
            },
            CallKind::Bottom(n) => WindowReducer::Extreme {
                n: *n,
                top: false,
                points: Vec::new(),
            },
            CallKind::Distinct => WindowReducer::Distinct(BTreeMap::new()),
            CallKind::Sample(n) => WindowReducer::Sample {
                n: *n,
                seen: 0,
                points: Vec::new(),
            },
            CallKind::Absent => WindowReducer::Absent(false),
            CallKind::Rate | CallKind::Irate => WindowReducer::Rate {
                irate: matches!(call.call.kind, CallKind::Irate),
                unit: ctx.rate_unit,
                first: None,
                prev: None,
                last: None,
            },
            CallKind::Elapsed(unit) => WindowReducer::Elapsed {
                unit: unit.unwrap_or(1),
                prev: None,
                points: Vec::new(),
            },
            CallKind::Integral(unit) => WindowReducer::Integral(IntegralState {
                unit: unit.unwrap_or(NANOS_PER_SECOND),
                ..IntegralState::default()
            }),
            CallKind::Castor { .. } => WindowReducer::Castor(Vec::new()),
            CallKind::Derivative { .. }
            | CallKind::Difference { .. }
            | CallKind::CumulativeSum
            | CallKind::MovingAverage(_) => WindowReducer::Count(0),
        }
    }

    /// True when the reducer integrates across window edges
    pub(crate) fn needs_lookahead(&self) -> bool {
        matches!(self, WindowReducer::Integral(_))
    }

    /// Accumulate one span of the current window
    pub(crate) fn update(&mut self, input: &SpanInput<'_>, ctx: &ReducerContext) {
        let aux = |row: usize| {
            if ctx.capture_aux {
                input.aux.capture(row)
            } else {
                Vec::new()
            }
        };

        match self {
            WindowReducer::Count(n) => {
                let present = input.rows.len()
                    - input
                        .column
                        .iter_range(input.rows.clone())
                        .filter(|(_, v)| v.is_none())
                        .count();
                *n += present as i64;
            }
            WindowReducer::SumInteger(sum) => {
                for (_, _, v) in input.values() {
                    if let ValueRef::Integer(x) = v {
                        *sum = Some(sum.unwrap_or(0).wrapping_add(x));
                    }
                }
            }
            WindowReducer::SumFloat(sum) => {
                for (_, _, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        sum.get_or_insert_with(KahanSum::new).add(x);
                    }
                }
            }
            WindowReducer::Mean { sum, n } => {
                for (_, _, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        sum.add(x);
                        *n += 1;
                    }
                }
            }
            WindowReducer::Select { mode, best } => {
                for (row, t, v) in input.values() {
                    let better = match best {
                        None => true,
                        Some(b) => match mode {
                            SelectMode::Min => {
                                compare_values(&v, &b.value.as_value_ref()) == Ordering::Less
                            }
                            SelectMode::Max => {
                                compare_values(&v, &b.value.as_value_ref()) == Ordering::Greater
                            }
                            SelectMode::First => t < b.time,
                            SelectMode::Last => t >= b.time,
                        },
                    };
                    if better {
                        *best = Some(Point {
                            time: t,
                            value: v.to_owned_value(),
                            aux: aux(row),
                        });
                    }
                }
            }
            WindowReducer::Spread { min, max } => {
                for (_, _, v) in input.values() {
                    let lower = min
                        .as_ref()
                        .map_or(true, |m| compare_values(&v, &m.as_value_ref()) == Ordering::Less);
                    if lower {
                        *min = Some(v.to_owned_value());
                    }
                    let higher = max.as_ref().map_or(true, |m| {
                        compare_values(&v, &m.as_value_ref()) == Ordering::Greater
                    });
                    if higher {
                        *max = Some(v.to_owned_value());
                    }
                }
            }
            WindowReducer::Stddev(w) => {
                for (_, _, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        w.add(x);
                    }
                }
            }
            WindowReducer::Median(points) => {
                for (row, t, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        points.push(Point {
                            time: t,
                            value: Value::Float(x),
                            aux: aux(row),
                        });
                    }
                }
            }
            WindowReducer::Mode(counts) => {
                for (row, t, v) in input.values() {
                    let value = v.to_owned_value();
                    counts
                        .entry(OrdValue(value.clone()))
                        .or_insert_with(|| {
                            (
                                0,
                                Point {
                                    time: t,
                                    value,
                                    aux: aux(row),
                                },
                            )
                        })
                        .0 += 1;
                }
            }
            WindowReducer::Percentile { points, .. } => {
                for (row, t, v) in input.values() {
                    points.push(Point {
                        time: t,
                        value: v.to_owned_value(),
                        aux: aux(row),
                    });
                }
            }
            WindowReducer::Extreme { n, top, points } => {
                for (row, t, v) in input.values() {
                    points.push(Point {
                        time: t,
                        value: v.to_owned_value(),
                        aux: aux(row),
                    });
                    // Bounded: shrink back to N once twice as many are held
                    if points.len() >= 2 * *n + 1 {
                        rank_extremes(points, *top);
                        points.truncate(*n);
                    }
                }
            }
            WindowReducer::Distinct(seen) => {
                for (row, t, v) in input.values() {
                    seen.entry(OrdValue(v.to_owned_value()))
                        .or_insert_with(|| (t, aux(row)));
                }
            }
            WindowReducer::Sample { n, seen, points } => {
                let mut rng = rand::rng();
                for (row, t, v) in input.values() {
                    let point = Point {
                        time: t,
                        value: v.to_owned_value(),
                        aux: aux(row),
                    };
                    if points.len() < *n {
                        points.push(point);
                    } else {
                        let j = rng.random_range(0..=*seen);
                        if j < *n {
                            points[j] = point;
                        }
                    }
                    *seen += 1;
                }
            }
            WindowReducer::Absent(seen) => {
                if input.values().next().is_some() {
                    *seen = true;
                }
            }
            WindowReducer::Rate {
                first, prev, last, ..
            } => {
                for (_, t, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        if first.is_none() {
                            *first = Some((t, x));
                        }
                        *prev = *last;
                        *last = Some((t, x));
                    }
                }
            }
            WindowReducer::Elapsed { unit, prev, points } => {
                for (_, t, _) in input.values() {
                    if let Some(p) = *prev {
                        points.push(Point {
                            time: t,
                            value: Value::Integer((t - p) / *unit),
                            aux: Vec::new(),
                        });
                    }
                    *prev = Some(t);
                }
            }
            WindowReducer::Integral(state) => {
                for (_, t, v) in input.values() {
                    if let Some(x) = v.as_f64() {
                        if let Some((pt, pv)) = state.prev {
                            state.area += (pv + x) / 2.0 * (t - pt).abs() as f64;
                        }
                        state.prev = Some((t, x));
                        state.seen = true;
                    }
                }
            }
            WindowReducer::Castor(series) => {
                series.extend(
                    input
                        .values()
                        .filter_map(|(_, t, v)| v.as_f64().map(|x| (t, x))),
                );
            }
        }
    }

    /// Produce the window result and reset for the next window
    pub(crate) fn finalize(&mut self, end: WindowEnd, ctx: &ReducerContext) -> Finalized {
        match self {
            WindowReducer::Count(n) => {
                let out = (*n > 0).then(|| Value::Integer(*n));
                *n = 0;
                Finalized::Value(out)
            }
            WindowReducer::SumInteger(sum) => Finalized::Value(sum.take().map(Value::Integer)),
            WindowReducer::SumFloat(sum) => {
                Finalized::Value(sum.take().map(|s| Value::Float(s.sum())))
            }
            WindowReducer::Mean { sum, n } => {
                let out = (*n > 0).then(|| Value::Float(sum.sum() / *n as f64));
                *sum = KahanSum::new();
                *n = 0;
                Finalized::Value(out)
            }
            WindowReducer::Select { best, .. } => Finalized::Selected(best.take()),
            WindowReducer::Spread { min, max } => {
                let out = match (min.take(), max.take()) {
                    (Some(Value::Integer(a)), Some(Value::Integer(b))) => {
                        Some(Value::Integer(b.wrapping_sub(a)))
                    }
                    (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => Some(Value::Float(b - a)),
                        _ => None,
                    },
                    _ => None,
                };
                Finalized::Value(out)
            }
            WindowReducer::Stddev(w) => {
                let out = w.stddev_sample().map(Value::Float);
                *w = WelfordState::new();
                Finalized::Value(out)
            }
            WindowReducer::Median(points) => {
                let mut points = std::mem::take(points);
                if points.is_empty() {
                    return Finalized::Selected(None);
                }
                let x = |p: &Point| p.value.as_f64().unwrap_or(f64::NAN);
                points.sort_by(|a, b| x(a).total_cmp(&x(b)).then(a.time.cmp(&b.time)));
                let mid = points.len() / 2;
                // even counts average the two middle values and report the
                // lower middle row
                let (median, pick) = if points.len() % 2 == 1 {
                    (x(&points[mid]), mid)
                } else {
                    ((x(&points[mid - 1]) + x(&points[mid])) / 2.0, mid - 1)
                };
                let mut selected = points.swap_remove(pick);
                selected.value = Value::Float(median);
                Finalized::Selected(Some(selected))
            }
            WindowReducer::Mode(counts) => {
                let counts = std::mem::take(counts);
                let mut best: Option<(usize, Point)> = None;
                // Ascending iteration with a strict comparison keeps the
                // smallest value on ties
                for (_, (count, point)) in counts {
                    if best.as_ref().map_or(true, |(c, _)| count > *c) {
                        best = Some((count, point));
                    }
                }
                Finalized::Selected(best.map(|(_, p)| p))
            }
            WindowReducer::Percentile { p, points } => {
                let mut points = std::mem::take(points);
                if points.is_empty() {
                    return Finalized::Selected(None);
                }
                points.sort_by(|a, b| {
                    compare_values(&a.value.as_value_ref(), &b.value.as_value_ref())
                        .then(a.time.cmp(&b.time))
                });
                let idx = (points.len() as f64 * *p / 100.0 + 0.5).floor() as i64 - 1;
                if idx < 0 || idx as usize >= points.len() {
                    return Finalized::Selected(None);
                }
                Finalized::Selected(Some(points.swap_remove(idx as usize)))
            }
            WindowReducer::Extreme { n, top, points } => {
                let mut points = std::mem::take(points);
                rank_extremes(&mut points, *top);
                points.truncate(*n);
                sort_by_time(&mut points, ctx.ascending);
                Finalized::Points(points)
            }
            WindowReducer::Distinct(seen) => {
                let seen = std::mem::take(seen);
                let points = seen
                    .into_iter()
                    .map(|(value, (time, aux))| Point {
                        time,
                        value: value.0,
                        aux,
                    })
                    .collect();
                Finalized::Points(points)
            }
            WindowReducer::Sample { seen, points, .. } => {
                let mut points = std::mem::take(points);
                *seen = 0;
                sort_by_time(&mut points, ctx.ascending);
                Finalized::Points(points)
            }
            WindowReducer::Absent(seen) => {
                let out = seen.then_some(Value::Integer(1));
                *seen = false;
                Finalized::Value(out)
            }
            WindowReducer::Rate {
                irate,
                unit,
                first,
                prev,
                last,
            } => {
                let from = if *irate { *prev } else { *first };
                let out = match (from, *last) {
                    (Some((t0, v0)), Some((t1, v1))) if t1 != t0 => Some(Value::Float(
                        (v1 - v0) / (t1 - t0) as f64 * *unit as f64,
                    )),
                    _ => None,
                };
                *first = None;
                *prev = None;
                *last = None;
                Finalized::Value(out)
            }
            WindowReducer::Elapsed { prev, points, .. } => {
                *prev = None;
                Finalized::Points(std::mem::take(points))
            }
            WindowReducer::Integral(state) => {
                let mut carry = None;
                if let (Some(p), Some(next), Some(b)) = (state.prev, end.lookahead, end.boundary) {
                    let between = (p.0 <= b && b <= next.0) || (next.0 <= b && b <= p.0);
                    if between {
                        let vb = interpolate(b, p, next);
                        state.area += (p.1 + vb) / 2.0 * (b - p.0).abs() as f64;
                        carry = Some((b, vb));
                    }
                }
                let out = state
                    .seen
                    .then(|| Value::Float(state.area / state.unit as f64));
                state.area = 0.0;
                state.seen = false;
                state.prev = carry;
                Finalized::Value(out)
            }
            WindowReducer::Castor(series) => Finalized::Castor(std::mem::take(series)),
        }
    }
}

fn select(mode: SelectMode) -> WindowReducer {
    WindowReducer::Select { mode, best: None }
}

/// Best first: value descending for top, ascending for bottom; earlier
/// times win ties, then arrival order
fn rank_extremes(points: &mut [Point], top: bool) {
    points.sort_by(|a, b| {
        let ord = compare_values(&a.value.as_value_ref(), &b.value.as_value_ref());
        let ord = if top { ord.reverse() } else { ord };
        ord.then(a.time.cmp(&b.time))
    });
}

fn sort_by_time(points: &mut [Point], ascending: bool) {
    if ascending {
        points.sort_by_key(|p| p.time);
    } else {
        points.sort_by_key(|p| std::cmp::Reverse(p.time));
    }
}
