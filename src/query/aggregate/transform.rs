//! Streaming aggregate transform
//!
//! Pipeline processor wrapping a [`StreamAggregator`]: one input port of
//! raw chunks, one output port of aggregated chunks. Windows delegated to
//! castor are resolved through the configured [`CastorClient`] before the
//! chunks following them are released, so output order matches input
//! order.

use std::sync::Arc;

use super::castor::CastorClient;
use super::stream::StreamAggregator;
use crate::query::error::QueryError;
use crate::query::pipeline::port::{InputPort, OutputPort, SendStatus};
use crate::query::pipeline::processor::{close_outputs, ExecutionContext, Processor};
use crate::query::query_schema::QuerySchema;

/// Aggregating pipeline stage
pub struct StreamAggregateTransform {
    aggregator: StreamAggregator,
    castor: Option<Arc<dyn CastorClient>>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    chunks_in: u64,
    chunks_out: u64,
    castor_batches: u64,
    closed: bool,
}

impl StreamAggregateTransform {
    /// Transform for the calls of `schema`
    ///
    /// Queries delegating to castor need a client, see [`Self::with_castor`].
    pub fn new(schema: &QuerySchema) -> Result<Self, QueryError> {
        let aggregator = StreamAggregator::new(schema)?;
        let outputs = vec![OutputPort::new(aggregator.output_schema().clone())];
        Ok(Self {
            inputs: vec![InputPort::new(schema.source().clone())],
            outputs,
            aggregator,
            castor: None,
            chunks_in: 0,
            chunks_out: 0,
            castor_batches: 0,
            closed: false,
        })
    }

    /// Use `client` for castor windows
    pub fn with_castor(mut self, client: Arc<dyn CastorClient>) -> Self {
        self.castor = Some(client);
        self
    }

    /// Input port, for wiring
    pub fn input(&mut self) -> &mut InputPort {
        &mut self.inputs[0]
    }

    /// Output port, for wiring
    pub fn output(&mut self) -> &mut OutputPort {
        &mut self.outputs[0]
    }

    /// Resolve pending castor windows; `false` when aborted mid round trip
    async fn resolve_castor(&mut self, ctx: &ExecutionContext) -> Result<bool, QueryError> {
        let jobs = self.aggregator.take_castor_jobs();
        if jobs.is_empty() {
            return Ok(true);
        }
        let client = self
            .castor
            .clone()
            .ok_or_else(|| QueryError::planning("castor() requires a configured worker"))?;
        for job in jobs {
            let request = job.request();
            let response = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => {
                    tracing::debug!(batches = self.castor_batches, "Castor round trip aborted");
                    return Ok(false);
                }
                response = client.detect(&request) => response?,
            };
            self.castor_batches += 1;
            self.aggregator.apply_castor(&job, response.points())?;
        }
        Ok(true)
    }

    /// Send every ready chunk; `false` once the consumer stopped listening
    async fn drain_ready(&mut self, ctx: &ExecutionContext) -> Result<bool, QueryError> {
        while let Some(chunk) = self.aggregator.pop_ready() {
            match self.outputs[0].send(chunk, &ctx.token).await? {
                SendStatus::Sent => self.chunks_out += 1,
                SendStatus::Cancelled | SendStatus::Disconnected => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn run(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        while let Some(chunk) = self.inputs[0].recv(&ctx.token).await? {
            self.chunks_in += 1;
            self.aggregator.push(&chunk)?;
            if !self.resolve_castor(ctx).await? {
                return Ok(());
            }
            if !self.drain_ready(ctx).await? {
                return Ok(());
            }
        }
        if ctx.is_cancelled() {
            return Ok(());
        }

        self.aggregator.finish()?;
        if !self.resolve_castor(ctx).await? {
            return Ok(());
        }
        self.aggregator.flush();
        self.drain_ready(ctx).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Processor for StreamAggregateTransform {
    fn name(&self) -> &'static str {
        "StreamAggregateTransform"
    }

    fn inputs(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn outputs(&mut self) -> &mut [OutputPort] {
        &mut self.outputs
    }

    async fn work(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        let result = self.run(ctx).await;
        self.inputs[0].close();
        close_outputs(self);
        tracing::debug!(
            chunks_in = self.chunks_in,
            chunks_out = self.chunks_out,
            castor_batches = self.castor_batches,
            "Aggregate transform done"
        );
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for input in &mut self.inputs {
            input.close();
        }
        close_outputs(self);
    }

    fn explain(&self) -> Vec<(String, String)> {
        let calls = self
            .aggregator
            .output_schema()
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            ("calls".to_string(), calls),
            ("castor".to_string(), self.castor.is_some().to_string()),
        ]
    }
}
