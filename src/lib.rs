//! Kuba Exec - streaming query execution core for time-series data
//!
//! This library provides the execution side of a time-series query engine:
//! - Columnar chunks with tag-group and window indexes
//! - A dataflow pipeline of processors wired by bounded, typed ports
//! - A streaming aggregate transform carrying window state across chunks
//! - A cursor hierarchy merging immutable files and the mutable table
//! - Options and schema derivation for queries and subqueries
//!
//! # Example
//!
//! ```no_run
//! use kuba_exec::config::StorageConfig;
//! use kuba_exec::query::aggregate::{AggregateCall, CallKind};
//! use kuba_exec::query::executor::{ExecutorConfig, QueryExecutor};
//! use kuba_exec::query::options::Interval;
//! use kuba_exec::query::schema::{DataType, Field, RowDataType};
//! use kuba_exec::query::QuerySchema;
//! use kuba_exec::storage::MemoryShard;
//!
//! # async fn example() -> Result<(), kuba_exec::query::QueryError> {
//! let shard = MemoryShard::new(1, &StorageConfig::default());
//! let executor = QueryExecutor::with_config(ExecutorConfig::new());
//! let source = RowDataType::shared(vec![Field::new("usage", DataType::Float)]);
//! let schema = QuerySchema::aggregate(
//!     executor.options("cpu").with_interval(Interval::from_nanos(60_000_000_000, 0)),
//!     source,
//!     vec![AggregateCall::new(CallKind::Mean, "usage")],
//!     Vec::new(),
//! )?;
//! let output = executor.execute(&shard, schema).await?;
//! println!("{} rows", output.rows());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod index;
pub mod storage;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Query execution: chunks, pipeline, aggregation, cursors and options
pub mod query;

// Re-export main types
pub use error::{Error, Result};
pub use types::{SeriesId, TimeRange};
