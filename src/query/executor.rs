//! Query executor
//!
//! Wires one chain per cursor partition and runs it:
//!
//! ```text
//! ┌──────────────┐    ┌───────────────────────────┐
//! │ CursorSource │ -> │ StreamAggregateTransform? │ ─┐
//! └──────────────┘    └───────────────────────────┘  │   ┌─────────────┐
//! ┌──────────────┐    ┌───────────────────────────┐  ├─> │ CollectSink │
//! │ CursorSource │ -> │ StreamAggregateTransform? │ ─┘   └─────────────┘
//! └──────────────┘    └───────────────────────────┘
//! ```
//!
//! By default the shard aggregates inside its cursors and no transform is
//! inserted. Castor calls, or `pipeline_aggregation`, move aggregation into
//! the transform over raw cursors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::query::aggregate::{CastorClient, StreamAggregateTransform, TcpCastorClient};
use crate::query::chunk::Chunk;
use crate::query::error::QueryError;
use crate::query::options::ProcessorOptions;
use crate::query::pipeline::{
    connect_with_capacity, CollectSink, CursorSource, PipelineExecutor, Processor, SinkHandle,
};
use crate::query::query_schema::QuerySchema;
use crate::query::schema::RowDataType;
use crate::storage::{CursorContext, ShardReader};

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Rows per chunk for options built by the executor (default: 1024)
    pub chunk_size: usize,

    /// Bounded channel depth between two processors (default: 1)
    pub port_capacity: usize,

    /// Cursor partitions per query (default: num_cpus)
    pub parallelism: usize,

    /// Query deadline, `None` for no deadline (default: 30 seconds)
    pub timeout: Option<Duration>,

    /// Aggregate in the pipeline transform instead of the cursors
    pub pipeline_aggregation: bool,

    /// Maximum number of result rows, 0 for unlimited
    pub max_result_rows: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            port_capacity: 1,
            parallelism: num_cpus::get(),
            timeout: Some(Duration::from_secs(30)),
            pipeline_aggregation: false,
            max_result_rows: 0,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set rows per chunk
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the port channel depth
    pub fn with_port_capacity(mut self, capacity: usize) -> Self {
        self.port_capacity = capacity.max(1);
        self
    }

    /// Set the number of cursor partitions
    pub fn with_parallelism(mut self, partitions: usize) -> Self {
        self.parallelism = partitions.max(1);
        self
    }

    /// Set the query deadline
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Aggregate in the pipeline instead of the cursors
    pub fn with_pipeline_aggregation(mut self, enabled: bool) -> Self {
        self.pipeline_aggregation = enabled;
        self
    }

    /// Cap the number of result rows
    pub fn with_max_result_rows(mut self, rows: usize) -> Self {
        self.max_result_rows = rows;
        self
    }
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        let section = &config.executor;
        Self {
            chunk_size: section.chunk_size.max(1),
            port_capacity: section.port_capacity.max(1),
            parallelism: section.parallelism.max(1),
            timeout: (section.query_timeout_ms > 0)
                .then(|| Duration::from_millis(section.query_timeout_ms)),
            pipeline_aggregation: section.pipeline_aggregation,
            max_result_rows: 0,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Statistics of one query execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    /// Cursor partitions the query ran on
    pub partitions: usize,

    /// Processors in the pipeline
    pub processors: usize,

    /// Chunks returned
    pub chunks: usize,

    /// Rows returned
    pub rows: usize,

    /// Aggregation ran in the transform rather than the cursors
    pub pipeline_aggregation: bool,

    /// Wall time of the execution
    pub elapsed: Duration,
}

/// Result of one query
#[derive(Debug, Clone)]
pub struct QueryOutput {
    /// Schema of the returned chunks
    pub schema: Arc<RowDataType>,

    /// Chunks in partition order
    pub chunks: Vec<Chunk>,

    /// Execution statistics
    pub stats: ExecutionStats,
}

impl QueryOutput {
    /// Total number of rows
    pub fn rows(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Timestamps of every row, in output order
    pub fn times(&self) -> Vec<i64> {
        self.chunks
            .iter()
            .flat_map(|c| c.time().iter().copied())
            .collect()
    }
}

// ============================================================================
// Query Executor
// ============================================================================

struct Plan {
    pipeline: PipelineExecutor,
    results: SinkHandle,
    schema: Arc<RowDataType>,
    partitions: usize,
    in_pipeline: bool,
}

/// Builds and runs query pipelines against a shard
pub struct QueryExecutor {
    config: ExecutorConfig,
    castor: Option<Arc<dyn CastorClient>>,
}

impl QueryExecutor {
    /// Create a query executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            castor: None,
        }
    }

    /// Executor configured from `config`, with a TCP castor client
    pub fn from_config(config: &Config) -> Self {
        Self::with_config(ExecutorConfig::from(config))
            .with_castor(Arc::new(TcpCastorClient::from_config(&config.castor)))
    }

    /// Resolve castor calls through `client`
    pub fn with_castor(mut self, client: Arc<dyn CastorClient>) -> Self {
        self.castor = Some(client);
        self
    }

    /// Get executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Options for `measurement` carrying the configured chunk size
    pub fn options(&self, measurement: impl Into<String>) -> ProcessorOptions {
        ProcessorOptions::new(measurement).with_chunk_size(self.config.chunk_size)
    }

    fn build(&self, shard: &dyn ShardReader, schema: &QuerySchema) -> Result<Plan, QueryError> {
        let in_pipeline =
            schema.is_castor() || (self.config.pipeline_aggregation && schema.has_calls());
        let ctx = CursorContext {
            partitions: self.config.parallelism.max(1),
            with_aggregation: !in_pipeline,
        };
        let cursors = shard.create_cursors(schema, &ctx)?;
        let partitions = cursors.len();

        let output = schema.output().clone();
        let mut sink = CollectSink::new(output.clone(), partitions)
            .with_max_rows(self.config.max_result_rows);
        let results = sink.handle();
        let capacity = self.config.port_capacity;

        let mut processors: Vec<Box<dyn Processor>> = Vec::with_capacity(partitions * 2 + 1);
        for (partition, cursor) in cursors.into_iter().enumerate() {
            let mut source = CursorSource::new(cursor, partition);
            if in_pipeline {
                let mut transform = StreamAggregateTransform::new(schema)?;
                if let Some(client) = &self.castor {
                    transform = transform.with_castor(client.clone());
                }
                connect_with_capacity(source.output(), transform.input(), capacity)?;
                connect_with_capacity(transform.output(), sink.input(partition), capacity)?;
                processors.push(Box::new(source));
                processors.push(Box::new(transform));
            } else {
                connect_with_capacity(source.output(), sink.input(partition), capacity)?;
                processors.push(Box::new(source));
            }
        }
        if partitions > 0 {
            processors.push(Box::new(sink));
        }

        Ok(Plan {
            pipeline: PipelineExecutor::new(processors),
            results,
            schema: output,
            partitions,
            in_pipeline,
        })
    }

    /// Execute `schema` against `shard` and collect the result
    ///
    /// The query's abort token stops every processor; an abort is not an
    /// error and returns what was collected so far. The configured deadline
    /// aborts the query and fails with `Timeout`.
    pub async fn execute(
        &self,
        shard: &dyn ShardReader,
        schema: QuerySchema,
    ) -> Result<QueryOutput, QueryError> {
        let started = Instant::now();
        let mut plan = self.build(shard, &schema)?;
        let abort = schema.options().abort.clone();

        let run = plan.pipeline.execute(&abort);
        let result = match self.config.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => {
                    abort.cancel();
                    tracing::warn!(
                        measurement = %schema.options().name,
                        timeout_ms = deadline.as_millis() as u64,
                        "Query timed out"
                    );
                    Err(QueryError::timeout(format!(
                        "query exceeded {} ms",
                        deadline.as_millis()
                    )))
                }
            },
            None => run.await,
        };
        let processors = plan.pipeline.len();
        plan.pipeline.release();
        result?;

        let chunks = std::mem::take(&mut *plan.results.lock());
        let stats = ExecutionStats {
            partitions: plan.partitions,
            processors,
            chunks: chunks.len(),
            rows: chunks.iter().map(Chunk::len).sum(),
            pipeline_aggregation: plan.in_pipeline,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            measurement = %schema.options().name,
            partitions = stats.partitions,
            chunks = stats.chunks,
            rows = stats.rows,
            pipeline_aggregation = stats.pipeline_aggregation,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Query executed"
        );
        Ok(QueryOutput {
            schema: plan.schema,
            chunks,
            stats,
        })
    }

    /// Describe the pipeline `execute` would run, without running it
    pub fn explain(
        &self,
        shard: &dyn ShardReader,
        schema: &QuerySchema,
    ) -> Result<Vec<(&'static str, Vec<(String, String)>)>, QueryError> {
        let mut plan = self.build(shard, schema)?;
        let explain = plan.pipeline.explain();
        plan.pipeline.release();
        Ok(explain)
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::with_config(ExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::query::aggregate::{AggregateCall, CallKind};
    use crate::query::chunk::ChunkTags;
    use crate::query::error::QueryErrorKind;
    use crate::query::options::Interval;
    use crate::query::schema::{DataType, Field, ValueRef};
    use crate::storage::MemoryShard;

    fn usage() -> Arc<RowDataType> {
        RowDataType::shared(vec![Field::new("usage", DataType::Float)])
    }

    fn shard() -> MemoryShard {
        let shard = MemoryShard::new(1, &StorageConfig::default());
        for (host, offset) in [("a", 0.0), ("b", 100.0)] {
            let mut rows = Chunk::new("cpu", usage());
            for t in 0..10 {
                rows.append_row(t, &[Some(ValueRef::Float(offset + t as f64))]);
            }
            shard
                .write("cpu", &ChunkTags::parse(&format!("host={}", host)), &rows)
                .unwrap();
        }
        shard.flush();
        shard
    }

    fn sum_schema(executor: &QueryExecutor) -> QuerySchema {
        let options = executor
            .options("cpu")
            .with_interval(Interval::from_nanos(5, 0))
            .with_dimensions(["host"]);
        QuerySchema::aggregate(
            options,
            usage(),
            vec![AggregateCall::new(CallKind::Sum, "usage")],
            Vec::new(),
        )
        .unwrap()
    }

    fn sums(output: &QueryOutput) -> Vec<f64> {
        output
            .chunks
            .iter()
            .flat_map(|c| {
                (0..c.len())
                    .filter_map(|r| c.column(0).value(r)?.as_f64())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_config_from_file_section() {
        let mut config = Config::default();
        config.executor.query_timeout_ms = 0;
        config.executor.parallelism = 0;
        let exec = ExecutorConfig::from(&config);
        assert_eq!(exec.timeout, None);
        assert_eq!(exec.parallelism, 1);
    }

    #[tokio::test]
    async fn test_cursor_and_pipeline_aggregation_agree() {
        let shard = shard();
        let in_cursor = QueryExecutor::with_config(ExecutorConfig::new().with_parallelism(2));
        let out = in_cursor.execute(&shard, sum_schema(&in_cursor)).await.unwrap();
        assert!(!out.stats.pipeline_aggregation);
        assert_eq!(out.stats.partitions, 2);

        let in_pipeline = QueryExecutor::with_config(
            ExecutorConfig::new()
                .with_parallelism(2)
                .with_pipeline_aggregation(true),
        );
        let piped = in_pipeline
            .execute(&shard, sum_schema(&in_pipeline))
            .await
            .unwrap();
        assert!(piped.stats.pipeline_aggregation);

        let expected = vec![10.0, 35.0, 510.0, 535.0];
        for got in [sums(&out), sums(&piped)] {
            assert_eq!(got.len(), expected.len());
            for (a, b) in got.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[tokio::test]
    async fn test_ungrouped_sum_spans_all_series() {
        let shard = shard();
        for pipeline in [false, true] {
            let executor = QueryExecutor::with_config(
                ExecutorConfig::new()
                    .with_parallelism(1)
                    .with_pipeline_aggregation(pipeline),
            );
            let schema = QuerySchema::aggregate(
                executor.options("cpu").with_interval(Interval::from_nanos(5, 0)),
                usage(),
                vec![AggregateCall::new(CallKind::Sum, "usage")],
                Vec::new(),
            )
            .unwrap();
            let out = executor.execute(&shard, schema).await.unwrap();
            assert_eq!(out.stats.pipeline_aggregation, pipeline);

            // one row per window, hosts a and b summed together
            assert_eq!(out.rows(), 2);
            assert_eq!(out.times(), vec![0, 5]);
            let got = sums(&out);
            assert!((got[0] - 520.0).abs() < 1e-9);
            assert!((got[1] - 570.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_raw_query_and_explain() {
        let shard = shard();
        let executor = QueryExecutor::with_config(ExecutorConfig::new().with_parallelism(1));
        let schema = QuerySchema::raw(executor.options("cpu").with_limit(3, 0), usage()).unwrap();
        let explain = executor.explain(&shard, &schema).unwrap();
        assert_eq!(
            explain.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            vec!["CursorSource", "CollectSink"]
        );

        let out = executor.execute(&shard, schema).await.unwrap();
        // three rows per series, series merged by time
        assert_eq!(out.rows(), 6);
        assert_eq!(out.times(), vec![0, 0, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn test_castor_without_worker_is_planning_error() {
        use crate::query::aggregate::CallArg;
        let shard = shard();
        let executor = QueryExecutor::with_config(ExecutorConfig::new().with_parallelism(1));
        let args =
            ["DIFFERENTIATEAD", "detect_base", "detect"].map(|s| CallArg::Str(s.to_string()));
        let call = AggregateCall::parse("castor", "usage", &args).unwrap();
        let schema = QuerySchema::aggregate(
            executor.options("cpu").with_interval(Interval::from_nanos(5, 0)),
            usage(),
            vec![call],
            Vec::new(),
        )
        .unwrap();
        let err = executor.execute(&shard, schema).await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::PlanningError);
    }

    #[tokio::test]
    async fn test_result_row_limit() {
        let shard = shard();
        let executor = QueryExecutor::with_config(
            ExecutorConfig::new().with_parallelism(1).with_max_result_rows(5),
        );
        let schema = QuerySchema::raw(executor.options("cpu"), usage()).unwrap();
        let err = executor.execute(&shard, schema).await.unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ResourceLimit);
    }

    #[tokio::test]
    async fn test_unknown_measurement_is_empty() {
        let executor = QueryExecutor::default();
        let schema = QuerySchema::raw(executor.options("disk"), usage()).unwrap();
        let out = executor.execute(&shard(), schema).await.unwrap();
        assert_eq!(out.rows(), 0);
        assert_eq!(out.stats.partitions, 0);
    }
}
