//! Result sink
//!
//! Terminal processor collecting the chunks of every partition. Inputs are
//! read one after the other, so results come out in partition order.

use std::sync::Arc;

use parking_lot::Mutex;

use super::port::{InputPort, OutputPort};
use super::processor::{ExecutionContext, Processor};
use crate::query::chunk::Chunk;
use crate::query::error::QueryError;
use crate::query::schema::RowDataType;

/// Shared handle on the collected chunks
pub type SinkHandle = Arc<Mutex<Vec<Chunk>>>;

/// Collects every chunk it receives
pub struct CollectSink {
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    results: SinkHandle,
    max_rows: usize,
    rows: usize,
}

impl CollectSink {
    /// Sink with `partitions` inputs of `schema`
    pub fn new(schema: Arc<RowDataType>, partitions: usize) -> Self {
        let inputs = (0..partitions.max(1))
            .map(|_| InputPort::new(schema.clone()))
            .collect();
        Self {
            inputs,
            outputs: Vec::new(),
            results: Arc::new(Mutex::new(Vec::new())),
            max_rows: 0,
            rows: 0,
        }
    }

    /// Fail once more than `max_rows` rows were collected (0 = unlimited)
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Input port of `partition`, for wiring
    pub fn input(&mut self, partition: usize) -> &mut InputPort {
        &mut self.inputs[partition]
    }

    /// Handle on the results, readable after execution
    pub fn handle(&self) -> SinkHandle {
        self.results.clone()
    }

    async fn run(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        for input in &mut self.inputs {
            while let Some(chunk) = input.recv(&ctx.token).await? {
                if chunk.is_empty() {
                    continue;
                }
                self.rows += chunk.len();
                if self.max_rows > 0 && self.rows > self.max_rows {
                    return Err(QueryError::resource_limit(format!(
                        "result exceeds {} rows",
                        self.max_rows
                    )));
                }
                self.results.lock().push(chunk);
            }
            if ctx.is_cancelled() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Processor for CollectSink {
    fn name(&self) -> &'static str {
        "CollectSink"
    }

    fn inputs(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn outputs(&mut self) -> &mut [OutputPort] {
        &mut self.outputs
    }

    async fn work(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        let result = self.run(ctx).await;
        for input in &mut self.inputs {
            input.close();
        }
        tracing::debug!(
            partitions = self.inputs.len(),
            rows = self.rows,
            "Sink collected results"
        );
        result
    }

    fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }

    fn explain(&self) -> Vec<(String, String)> {
        vec![("partitions".to_string(), self.inputs.len().to_string())]
    }
}
