//! Query execution
//!
//! The pieces a query goes through once it has been planned:
//!
//! ```text
//!  ProcessorOptions + calls ──> QuerySchema
//!                                   │
//!                                   ▼
//!  ShardReader::create_cursors ──> [AggregateCursor] per partition
//!                                   │   └─ GroupCursor ─ TagSetCursor ─ leaves
//!                                   ▼
//!  PipelineExecutor:  CursorSource ─> [StreamAggregateTransform] ─> CollectSink
//! ```
//!
//! - [`chunk`]: columnar batches with tag and window indexes
//! - [`pipeline`]: ports, processors and the task-per-processor executor
//! - [`aggregate`]: reducers, the streaming aggregator and castor delegation
//! - [`cursor`]: pull-based storage readers
//! - [`options`]: per-query options, windows and subquery derivation
//! - [`executor`]: end-to-end wiring against a shard

pub mod aggregate;
pub mod chunk;
pub mod condition;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod options;
pub mod pipeline;
pub mod query_schema;
pub mod schema;

// Re-export main types
pub use chunk::{Chunk, ChunkTags};
pub use error::{QueryError, QueryErrorKind};
pub use executor::{ExecutionStats, ExecutorConfig, QueryExecutor, QueryOutput};
pub use options::ProcessorOptions;
pub use query_schema::QuerySchema;
pub use schema::{DataType, Field, RowDataType};
