//! Query schema
//!
//! Everything a shard needs to build cursors and a transform needs to
//! aggregate: the options, the columns read from storage, and the bound
//! aggregation plan when the query has calls.

use std::sync::Arc;

use crate::query::aggregate::{AggregateCall, AggregatePlan};
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::schema::RowDataType;

/// Read-only description of one (sub)query
#[derive(Debug, Clone)]
pub struct QuerySchema {
    options: Arc<ProcessorOptions>,
    source: Arc<RowDataType>,
    calls: Vec<AggregateCall>,
    aux: Vec<String>,
    plan: Option<Arc<AggregatePlan>>,
}

impl QuerySchema {
    /// Raw query: rows are returned as read
    pub fn raw(options: ProcessorOptions, source: Arc<RowDataType>) -> Result<Self, QueryError> {
        let schema = Self {
            options: Arc::new(options),
            source,
            calls: Vec::new(),
            aux: Vec::new(),
            plan: None,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Aggregate query: `calls` over `source`, with `aux` columns carried
    /// next to a single selector
    pub fn aggregate(
        options: ProcessorOptions,
        source: Arc<RowDataType>,
        calls: Vec<AggregateCall>,
        aux: Vec<String>,
    ) -> Result<Self, QueryError> {
        let plan = AggregatePlan::new(&source, &calls, &aux)?;
        let schema = Self {
            options: Arc::new(options),
            source,
            calls,
            aux,
            plan: Some(Arc::new(plan)),
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<(), QueryError> {
        self.options.validate()?;
        if self.source.is_empty() {
            return Err(QueryError::validation("query reads no column"));
        }
        if let Some(condition) = &self.options.condition {
            for field in condition.field_refs() {
                if self.source.index_of(&field).is_none() {
                    return Err(QueryError::validation(format!(
                        "condition references unknown field '{}'",
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Shared processor options
    pub fn options(&self) -> &Arc<ProcessorOptions> {
        &self.options
    }

    /// Columns read from storage
    pub fn source(&self) -> &Arc<RowDataType> {
        &self.source
    }

    /// Schema of the rows the query produces
    pub fn output(&self) -> &Arc<RowDataType> {
        match &self.plan {
            Some(plan) => &plan.output,
            None => &self.source,
        }
    }

    /// Aggregate calls in output order
    pub fn calls(&self) -> &[AggregateCall] {
        &self.calls
    }

    /// Auxiliary column names
    pub fn aux(&self) -> &[String] {
        &self.aux
    }

    /// Bound aggregation plan, `None` for raw queries
    pub fn plan(&self) -> Option<&Arc<AggregatePlan>> {
        self.plan.as_ref()
    }

    /// True when the query aggregates
    pub fn has_calls(&self) -> bool {
        self.plan.is_some()
    }

    /// True when a call is delegated to the castor worker
    pub fn is_castor(&self) -> bool {
        self.plan.as_ref().is_some_and(|p| p.is_castor())
    }

    /// Same query without its calls, for sources feeding a transform
    pub fn without_calls(&self) -> QuerySchema {
        Self {
            options: self.options.clone(),
            source: self.source.clone(),
            calls: Vec::new(),
            aux: Vec::new(),
            plan: None,
        }
    }
}
