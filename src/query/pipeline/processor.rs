//! Processor contract

use tokio_util::sync::CancellationToken;

use super::port::{InputPort, OutputPort};
use crate::query::error::QueryError;

/// Per-execution context handed to every processor
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Fires when the query is aborted or a sibling processor failed
    pub token: CancellationToken,
}

impl ExecutionContext {
    /// Context observing `token`
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// True once the query was aborted
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One stage of a dataflow pipeline
///
/// `work` runs until every input port is drained or the context is
/// cancelled, sending to the output ports and closing them before it
/// returns. Cancellation is not an error: a cancelled processor returns
/// `Ok(())`.
#[async_trait::async_trait]
pub trait Processor: Send {
    /// Processor name for logs and explain output
    fn name(&self) -> &'static str;

    /// Input ports, in wiring order
    fn inputs(&mut self) -> &mut [InputPort];

    /// Output ports, in wiring order
    fn outputs(&mut self) -> &mut [OutputPort];

    /// Run to completion or cancellation
    async fn work(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError>;

    /// Release resources; must be idempotent
    fn close(&mut self);

    /// Diagnostic key/value pairs
    fn explain(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Close every output port of `processor`
pub(crate) fn close_outputs(processor: &mut dyn Processor) {
    for out in processor.outputs() {
        out.close();
    }
}
