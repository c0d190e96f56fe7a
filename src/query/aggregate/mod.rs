//! Aggregate calls and planning
//!
//! Function names are resolved once, at planning time, into a closed
//! `CallKind` enumeration. Planning binds every call to its source column,
//! derives the output schema and checks the rules that keep one transform
//! well defined:
//!
//! - windowed and non-windowed calls cannot be mixed
//! - calls that emit several rows per window must be the only call
//! - auxiliary columns need selector mode (exactly one selector call)

pub mod castor;
pub(crate) mod carry;
pub mod numeric;
pub(crate) mod reducer;
pub mod stream;
pub mod transform;

pub use castor::{CastorClient, CastorJob, CastorRequest, CastorResponse, TcpCastorClient};
pub use stream::StreamAggregator;
pub use transform::StreamAggregateTransform;

use std::fmt;
use std::sync::Arc;

use crate::query::error::QueryError;
use crate::query::schema::{DataType, Field, RowDataType};

// ============================================================================
// Call Kinds
// ============================================================================

/// Output mode of `difference`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DifferenceMode {
    /// `current - previous`
    #[default]
    Behind,
    /// `previous - current`
    Front,
    /// `|current - previous|`
    Absolute,
}

/// Every supported aggregate function
#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    /// Number of non-null values
    Count,
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Mean,
    /// Smallest value (selector)
    Min,
    /// Largest value (selector)
    Max,
    /// Value with the smallest time (selector)
    First,
    /// Value with the largest time (selector)
    Last,
    /// `max - min`
    Spread,
    /// Sample standard deviation
    Stddev,
    /// Middle value (selector: the middle row, the lower one for even counts)
    Median,
    /// Most frequent value (selector: the first row holding it)
    Mode,
    /// Nearest-rank percentile (selector)
    Percentile(f64),
    /// N largest values (selector, several rows)
    Top(usize),
    /// N smallest values (selector, several rows)
    Bottom(usize),
    /// One row per distinct value (selector, several rows)
    Distinct,
    /// Up to N random rows (selector, several rows)
    Sample(usize),
    /// 1 when the window holds any value
    Absent,
    /// Slope between first and last point of the window
    Rate,
    /// Slope between the two latest points of the window
    Irate,
    /// Time between consecutive points (several rows); unit in ns
    Elapsed(Option<i64>),
    /// Area under the curve; unit in ns
    Integral(Option<i64>),
    /// Rate of change between consecutive points; unit in ns
    Derivative {
        /// Time unit, defaults to the interval or 1s
        unit: Option<i64>,
        /// Drop negative results
        non_negative: bool,
    },
    /// Difference between consecutive points
    Difference {
        /// Sign convention
        mode: DifferenceMode,
        /// Drop negative results
        non_negative: bool,
    },
    /// Running total
    CumulativeSum,
    /// Mean of the last N values
    MovingAverage(usize),
    /// Delegated to an external worker (several rows)
    Castor {
        /// Algorithm name understood by the worker
        algorithm: String,
        /// Worker-side configuration file
        config: String,
        /// Processing type (e.g. `detect`, `fit_detect`)
        process_type: String,
    },
}

impl CallKind {
    /// Function name as written in queries
    pub fn name(&self) -> &'static str {
        match self {
            CallKind::Count => "count",
            CallKind::Sum => "sum",
            CallKind::Mean => "mean",
            CallKind::Min => "min",
            CallKind::Max => "max",
            CallKind::First => "first",
            CallKind::Last => "last",
            CallKind::Spread => "spread",
            CallKind::Stddev => "stddev",
            CallKind::Median => "median",
            CallKind::Mode => "mode",
            CallKind::Percentile(_) => "percentile",
            CallKind::Top(_) => "top",
            CallKind::Bottom(_) => "bottom",
            CallKind::Distinct => "distinct",
            CallKind::Sample(_) => "sample",
            CallKind::Absent => "absent",
            CallKind::Rate => "rate",
            CallKind::Irate => "irate",
            CallKind::Elapsed(_) => "elapsed",
            CallKind::Integral(_) => "integral",
            CallKind::Derivative {
                non_negative: false,
                ..
            } => "derivative",
            CallKind::Derivative {
                non_negative: true, ..
            } => "non_negative_derivative",
            CallKind::Difference {
                non_negative: false,
                ..
            } => "difference",
            CallKind::Difference {
                non_negative: true, ..
            } => "non_negative_difference",
            CallKind::CumulativeSum => "cumulative_sum",
            CallKind::MovingAverage(_) => "moving_average",
            CallKind::Castor { .. } => "castor",
        }
    }

    /// False for the functions that carry state across windows
    pub fn is_windowed(&self) -> bool {
        !matches!(
            self,
            CallKind::Derivative { .. }
                | CallKind::Difference { .. }
                | CallKind::CumulativeSum
                | CallKind::MovingAverage(_)
        )
    }

    /// True for functions that pick input rows (and their times)
    pub fn is_selector(&self) -> bool {
        matches!(
            self,
            CallKind::Min
                | CallKind::Max
                | CallKind::First
                | CallKind::Last
                | CallKind::Median
                | CallKind::Mode
                | CallKind::Percentile(_)
                | CallKind::Top(_)
                | CallKind::Bottom(_)
                | CallKind::Sample(_)
                | CallKind::Distinct
        )
    }

    /// True for functions emitting several rows per window
    pub fn is_multi_row(&self) -> bool {
        matches!(
            self,
            CallKind::Top(_)
                | CallKind::Bottom(_)
                | CallKind::Sample(_)
                | CallKind::Distinct
                | CallKind::Elapsed(_)
                | CallKind::Castor { .. }
        )
    }

    /// Output type for a source column of type `source`
    pub fn output_type(&self, source: DataType) -> Result<DataType, QueryError> {
        let numeric = source.is_numeric();
        let unsupported = || -> Result<DataType, QueryError> {
            Err(QueryError::planning(format!(
                "{}() does not support {} input",
                self.name(),
                source
            )))
        };
        match self {
            CallKind::Count | CallKind::Absent | CallKind::Elapsed(_) => Ok(DataType::Integer),
            CallKind::First
            | CallKind::Last
            | CallKind::Distinct
            | CallKind::Sample(_)
            | CallKind::Mode => Ok(source),
            CallKind::Min | CallKind::Max => {
                if numeric || source == DataType::Boolean {
                    Ok(source)
                } else {
                    unsupported()
                }
            }
            CallKind::Sum
            | CallKind::Spread
            | CallKind::Percentile(_)
            | CallKind::Top(_)
            | CallKind::Bottom(_)
            | CallKind::Difference { .. }
            | CallKind::CumulativeSum => {
                if numeric {
                    Ok(source)
                } else {
                    unsupported()
                }
            }
            CallKind::Mean
            | CallKind::Stddev
            | CallKind::Median
            | CallKind::Rate
            | CallKind::Irate
            | CallKind::Integral(_)
            | CallKind::Derivative { .. }
            | CallKind::MovingAverage(_)
            | CallKind::Castor { .. } => {
                if numeric {
                    Ok(DataType::Float)
                } else {
                    unsupported()
                }
            }
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Calls
// ============================================================================

/// Literal argument of a call as it comes out of the parser
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// Duration literal in nanoseconds
    Duration(i64),
    /// String literal
    Str(String),
}

/// One aggregate call bound to a source field
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    /// Function
    pub kind: CallKind,
    /// Source field name
    pub field: String,
    /// Output column name override
    pub alias: Option<String>,
}

impl AggregateCall {
    /// Call `kind` over `field`
    pub fn new(kind: CallKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            alias: None,
        }
    }

    /// Set the output column name
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output column name: the alias or `name("field")`
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => format!("{}(\"{}\")", self.kind.name(), self.field),
        }
    }

    /// Resolve a function by name and literal arguments
    pub fn parse(
        name: &str,
        field: impl Into<String>,
        args: &[CallArg],
    ) -> Result<Self, QueryError> {
        let field = field.into();
        let kind = match (name, args) {
            ("count", []) => CallKind::Count,
            ("sum", []) => CallKind::Sum,
            ("mean", []) => CallKind::Mean,
            ("min", []) => CallKind::Min,
            ("max", []) => CallKind::Max,
            ("first", []) => CallKind::First,
            ("last", []) => CallKind::Last,
            ("spread", []) => CallKind::Spread,
            ("stddev", []) => CallKind::Stddev,
            ("median", []) => CallKind::Median,
            ("mode", []) => CallKind::Mode,
            ("distinct", []) => CallKind::Distinct,
            ("absent", []) => CallKind::Absent,
            ("rate", []) => CallKind::Rate,
            ("irate", []) => CallKind::Irate,
            ("cumulative_sum", []) => CallKind::CumulativeSum,
            ("percentile", [arg]) => {
                let p = match arg {
                    CallArg::Integer(v) => *v as f64,
                    CallArg::Float(v) => *v,
                    _ => return Err(bad_args(name, "a number")),
                };
                if !(0.0..=100.0).contains(&p) {
                    return Err(QueryError::planning(format!(
                        "percentile {} outside [0, 100]",
                        p
                    )));
                }
                CallKind::Percentile(p)
            }
            ("top", [arg]) => CallKind::Top(positive(name, arg)?),
            ("bottom", [arg]) => CallKind::Bottom(positive(name, arg)?),
            ("sample", [arg]) => CallKind::Sample(positive(name, arg)?),
            ("moving_average", [arg]) => {
                let n = positive(name, arg)?;
                if n < 2 {
                    return Err(QueryError::planning(
                        "moving_average window must be at least 2",
                    ));
                }
                CallKind::MovingAverage(n)
            }
            ("elapsed", rest) => CallKind::Elapsed(unit_arg(name, rest)?),
            ("integral", rest) => CallKind::Integral(unit_arg(name, rest)?),
            ("derivative", rest) => CallKind::Derivative {
                unit: unit_arg(name, rest)?,
                non_negative: false,
            },
            ("non_negative_derivative", rest) => CallKind::Derivative {
                unit: unit_arg(name, rest)?,
                non_negative: true,
            },
            ("difference", rest) | ("non_negative_difference", rest) => {
                let mode = match rest {
                    [] => DifferenceMode::Behind,
                    [CallArg::Str(s)] => match s.as_str() {
                        "behind" => DifferenceMode::Behind,
                        "front" => DifferenceMode::Front,
                        "absolute" => DifferenceMode::Absolute,
                        other => {
                            return Err(QueryError::planning(format!(
                                "unknown difference mode '{}'",
                                other
                            )))
                        }
                    },
                    _ => return Err(bad_args(name, "an optional mode string")),
                };
                CallKind::Difference {
                    mode,
                    non_negative: name == "non_negative_difference",
                }
            }
            (
                "castor",
                [CallArg::Str(algorithm), CallArg::Str(config), CallArg::Str(process_type)],
            ) => {
                CallKind::Castor {
                    algorithm: algorithm.clone(),
                    config: config.clone(),
                    process_type: process_type.clone(),
                }
            }
            ("castor", _) => {
                return Err(bad_args(name, "algorithm, config and process type strings"))
            }
            (
                "count" | "sum" | "mean" | "min" | "max" | "first" | "last" | "spread" | "stddev"
                | "median" | "mode" | "distinct" | "absent" | "rate" | "irate"
                | "cumulative_sum",
                _,
            ) => return Err(bad_args(name, "no arguments")),
            ("percentile" | "top" | "bottom" | "sample" | "moving_average", _) => {
                return Err(bad_args(name, "one argument"))
            }
            (other, _) => {
                return Err(QueryError::planning(format!(
                    "unknown aggregate function '{}'",
                    other
                )))
            }
        };
        Ok(Self::new(kind, field))
    }
}

fn bad_args(name: &str, expected: &str) -> QueryError {
    QueryError::planning(format!("{}() expects {}", name, expected))
}

fn positive(name: &str, arg: &CallArg) -> Result<usize, QueryError> {
    match arg {
        CallArg::Integer(v) if *v > 0 => Ok(*v as usize),
        _ => Err(bad_args(name, "a positive integer")),
    }
}

fn unit_arg(name: &str, args: &[CallArg]) -> Result<Option<i64>, QueryError> {
    match args {
        [] => Ok(None),
        [CallArg::Duration(d)] if *d > 0 => Ok(Some(*d)),
        _ => Err(bad_args(name, "an optional positive duration")),
    }
}

// ============================================================================
// Planning
// ============================================================================

/// A call bound to its source column
#[derive(Debug, Clone)]
pub struct BoundCall {
    /// The call
    pub call: AggregateCall,
    /// Position of the source column in the input schema
    pub source_index: usize,
    /// Source column type
    pub source_type: DataType,
    /// Output column type
    pub output_type: DataType,
}

/// Validated aggregation plan of one transform
#[derive(Debug, Clone)]
pub struct AggregatePlan {
    /// Bound calls in output column order
    pub calls: Vec<BoundCall>,
    /// Input positions of auxiliary columns, emitted after the calls
    pub aux: Vec<usize>,
    /// Output row schema
    pub output: Arc<RowDataType>,
    /// All calls are windowed
    pub windowed: bool,
    /// Exactly one call and it is a selector: rows carry the selected time
    pub selector_mode: bool,
}

impl AggregatePlan {
    /// Bind `calls` and `aux` columns against `input`
    pub fn new(
        input: &RowDataType,
        calls: &[AggregateCall],
        aux: &[String],
    ) -> Result<Self, QueryError> {
        if calls.is_empty() {
            return Err(QueryError::planning("aggregation needs at least one call"));
        }

        let mut bound = Vec::with_capacity(calls.len());
        let mut fields = Vec::with_capacity(calls.len() + aux.len());
        for call in calls {
            let source_index = input.index_of(&call.field).ok_or_else(|| {
                QueryError::planning(format!(
                    "{}() references unknown field '{}'",
                    call.kind.name(),
                    call.field
                ))
            })?;
            let source_type = input.fields()[source_index].data_type;
            let output_type = call.kind.output_type(source_type)?;
            fields.push(Field::new(call.output_name(), output_type));
            bound.push(BoundCall {
                call: call.clone(),
                source_index,
                source_type,
                output_type,
            });
        }

        let windowed = calls[0].kind.is_windowed();
        if calls.iter().any(|c| c.kind.is_windowed() != windowed) {
            return Err(QueryError::planning(
                "windowed and non-windowed functions cannot be mixed",
            ));
        }
        if calls.len() > 1 {
            if let Some(multi) = calls.iter().find(|c| c.kind.is_multi_row()) {
                return Err(QueryError::planning(format!(
                    "{}() must be the only function in the query",
                    multi.kind.name()
                )));
            }
        }

        let selector_mode = calls.len() == 1 && calls[0].kind.is_selector();
        if !aux.is_empty() && !selector_mode {
            return Err(QueryError::planning(
                "mixing aggregate and non-aggregate columns requires a single selector",
            ));
        }

        let mut aux_index = Vec::with_capacity(aux.len());
        for name in aux {
            let idx = input.index_of(name).ok_or_else(|| {
                QueryError::planning(format!("unknown auxiliary field '{}'", name))
            })?;
            fields.push(Field::new(name.clone(), input.fields()[idx].data_type));
            aux_index.push(idx);
        }

        Ok(Self {
            calls: bound,
            aux: aux_index,
            output: RowDataType::shared(fields),
            windowed,
            selector_mode,
        })
    }

    /// True when the single call is delegated to castor
    pub fn is_castor(&self) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c.call.kind, CallKind::Castor { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RowDataType {
        RowDataType::new(vec![
            Field::new("value1", DataType::Integer),
            Field::new("value2", DataType::Float),
            Field::new("name", DataType::String),
        ])
    }

    #[test]
    fn test_parse_known_functions() {
        let call = AggregateCall::parse("top", "value1", &[CallArg::Integer(2)]).unwrap();
        assert_eq!(call.kind, CallKind::Top(2));
        let call = AggregateCall::parse("difference", "value1", &[CallArg::Str("front".into())])
            .unwrap();
        assert_eq!(
            call.kind,
            CallKind::Difference {
                mode: DifferenceMode::Front,
                non_negative: false
            }
        );
        let call =
            AggregateCall::parse("derivative", "value2", &[CallArg::Duration(1_000)]).unwrap();
        assert!(!call.kind.is_windowed());
    }

    #[test]
    fn test_parse_rejects_unknown_and_bad_args() {
        let err = AggregateCall::parse("foo", "value1", &[]).unwrap_err();
        assert_eq!(err.kind, crate::query::error::QueryErrorKind::PlanningError);
        assert!(AggregateCall::parse("count", "value1", &[CallArg::Integer(1)]).is_err());
        assert!(AggregateCall::parse("top", "value1", &[CallArg::Integer(0)]).is_err());
        assert!(AggregateCall::parse("percentile", "value1", &[CallArg::Float(101.0)]).is_err());
    }

    #[test]
    fn test_plan_output_schema() {
        let plan = AggregatePlan::new(
            &input(),
            &[
                AggregateCall::new(CallKind::Count, "value2"),
                AggregateCall::new(CallKind::Min, "value2"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(plan.output.fields()[0].data_type, DataType::Integer);
        assert_eq!(plan.output.fields()[1].data_type, DataType::Float);
        assert_eq!(plan.output.fields()[0].name, "count(\"value2\")");
        assert!(plan.windowed);
        assert!(!plan.selector_mode);
    }

    #[test]
    fn test_plan_rules() {
        let mixed = AggregatePlan::new(
            &input(),
            &[
                AggregateCall::new(CallKind::Count, "value1"),
                AggregateCall::new(CallKind::CumulativeSum, "value1"),
            ],
            &[],
        );
        assert!(mixed.is_err());

        let multi = AggregatePlan::new(
            &input(),
            &[
                AggregateCall::new(CallKind::Top(2), "value1"),
                AggregateCall::new(CallKind::Count, "value1"),
            ],
            &[],
        );
        assert!(multi.is_err());

        let aux_without_selector = AggregatePlan::new(
            &input(),
            &[AggregateCall::new(CallKind::Count, "value1")],
            &["value2".to_string()],
        );
        assert!(aux_without_selector.is_err());

        let selector = AggregatePlan::new(
            &input(),
            &[AggregateCall::new(CallKind::Top(2), "value1")],
            &["value2".to_string()],
        )
        .unwrap();
        assert!(selector.selector_mode);
        assert_eq!(selector.output.len(), 2);
    }

    #[test]
    fn test_median_and_mode_accept_aux() {
        for kind in [CallKind::Median, CallKind::Mode] {
            let plan = AggregatePlan::new(
                &input(),
                &[AggregateCall::new(kind.clone(), "value1")],
                &["value2".to_string()],
            )
            .unwrap();
            assert!(kind.is_selector());
            assert!(plan.selector_mode);
            assert_eq!(plan.output.len(), 2);
        }
    }

    #[test]
    fn test_plan_rejects_bad_types() {
        let err = AggregatePlan::new(
            &input(),
            &[AggregateCall::new(CallKind::Sum, "name")],
            &[],
        )
        .unwrap_err();
        assert!(err.message.contains("sum"));
        assert!(AggregatePlan::new(
            &input(),
            &[AggregateCall::new(CallKind::Count, "missing")],
            &[]
        )
        .is_err());
    }
}
