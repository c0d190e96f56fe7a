//! Non-windowed reducers
//!
//! derivative, difference, cumulative_sum and moving_average need the
//! previous point of the series, not the window. Their state survives
//! window and chunk boundaries and is only reset when the tag group
//! changes. Each one emits at most one value per input row, at that row.

use std::collections::VecDeque;

use super::reducer::SpanInput;
use super::{BoundCall, CallKind, DifferenceMode};
use crate::query::schema::{Value, ValueRef};

/// Carry state of one non-windowed call
#[derive(Debug)]
pub(crate) enum CarryReducer {
    Derivative {
        unit: i64,
        non_negative: bool,
        ascending: bool,
        prev: Option<(i64, f64)>,
    },
    Difference {
        mode: DifferenceMode,
        non_negative: bool,
        prev: Option<(i64, Value)>,
    },
    CumulativeSum(Option<Value>),
    MovingAverage {
        n: usize,
        window: VecDeque<f64>,
    },
}

impl CarryReducer {
    /// Fresh state for `call`; `None` for windowed calls
    pub(crate) fn new(call: &BoundCall, default_unit: i64, ascending: bool) -> Option<Self> {
        match &call.call.kind {
            CallKind::Derivative { unit, non_negative } => Some(CarryReducer::Derivative {
                unit: unit.unwrap_or(default_unit),
                non_negative: *non_negative,
                ascending,
                prev: None,
            }),
            CallKind::Difference { mode, non_negative } => Some(CarryReducer::Difference {
                mode: *mode,
                non_negative: *non_negative,
                prev: None,
            }),
            CallKind::CumulativeSum => Some(CarryReducer::CumulativeSum(None)),
            CallKind::MovingAverage(n) => Some(CarryReducer::MovingAverage {
                n: *n,
                window: VecDeque::with_capacity(*n),
            }),
            _ => None,
        }
    }

    /// Forget the previous series
    pub(crate) fn reset(&mut self) {
        match self {
            CarryReducer::Derivative { prev, .. } => *prev = None,
            CarryReducer::Difference { prev, .. } => *prev = None,
            CarryReducer::CumulativeSum(sum) => *sum = None,
            CarryReducer::MovingAverage { window, .. } => window.clear(),
        }
    }

    /// Feed a span; `emit(row, value)` is called for every produced value
    pub(crate) fn update(&mut self, input: &SpanInput<'_>, emit: &mut dyn FnMut(usize, Value)) {
        let times = input.times;
        for (row, v) in input.column.iter_range(input.rows.clone()) {
            let Some(v) = v else { continue };
            let t = times[row];
            match self {
                CarryReducer::Derivative {
                    unit,
                    non_negative,
                    ascending,
                    prev,
                } => {
                    let Some(x) = v.as_f64() else { continue };
                    if let Some((pt, pv)) = *prev {
                        if pt == t {
                            continue;
                        }
                        let mut elapsed = t - pt;
                        if !*ascending {
                            elapsed = -elapsed;
                        }
                        let value = (x - pv) / (elapsed as f64 / *unit as f64);
                        *prev = Some((t, x));
                        if !(*non_negative && value < 0.0) {
                            emit(row, Value::Float(value));
                        }
                    } else {
                        *prev = Some((t, x));
                    }
                }
                CarryReducer::Difference {
                    mode,
                    non_negative,
                    prev,
                } => {
                    if let Some((pt, pv)) = prev.as_ref() {
                        if *pt == t {
                            continue;
                        }
                        let diff = difference(*mode, &pv.as_value_ref(), &v);
                        *prev = Some((t, v.to_owned_value()));
                        if let Some(diff) = diff {
                            let negative = match &diff {
                                Value::Integer(d) => *d < 0,
                                Value::Float(d) => *d < 0.0,
                                _ => false,
                            };
                            if !(*non_negative && negative) {
                                emit(row, diff);
                            }
                        }
                    } else {
                        *prev = Some((t, v.to_owned_value()));
                    }
                }
                CarryReducer::CumulativeSum(sum) => {
                    let next = match (sum.as_ref(), v) {
                        (None, v) => Some(v.to_owned_value()),
                        (Some(Value::Integer(s)), ValueRef::Integer(x)) => {
                            Some(Value::Integer(s.wrapping_add(x)))
                        }
                        (Some(Value::Float(s)), ValueRef::Float(x)) => Some(Value::Float(s + x)),
                        _ => None,
                    };
                    if let Some(next) = next {
                        emit(row, next.clone());
                        *sum = Some(next);
                    }
                }
                CarryReducer::MovingAverage { n, window } => {
                    let Some(x) = v.as_f64() else { continue };
                    window.push_back(x);
                    if window.len() > *n {
                        window.pop_front();
                    }
                    if window.len() == *n {
                        let mean = window.iter().sum::<f64>() / *n as f64;
                        emit(row, Value::Float(mean));
                    }
                }
            }
        }
    }
}

fn difference(mode: DifferenceMode, prev: &ValueRef<'_>, cur: &ValueRef<'_>) -> Option<Value> {
    match (prev, cur) {
        (ValueRef::Integer(p), ValueRef::Integer(c)) => Some(Value::Integer(match mode {
            DifferenceMode::Behind => c.wrapping_sub(*p),
            DifferenceMode::Front => p.wrapping_sub(*c),
            DifferenceMode::Absolute => c.wrapping_sub(*p).wrapping_abs(),
        })),
        (ValueRef::Float(p), ValueRef::Float(c)) => Some(Value::Float(match mode {
            DifferenceMode::Behind => c - p,
            DifferenceMode::Front => p - c,
            DifferenceMode::Absolute => (c - p).abs(),
        })),
        _ => None,
    }
}
