//! Source processors
//!
//! Entry points of a pipeline: [`CursorSource`] drives a storage cursor,
//! [`ChunkSource`] replays chunks already in memory.

use std::collections::VecDeque;
use std::sync::Arc;

use super::port::{InputPort, OutputPort, SendStatus};
use super::processor::{close_outputs, ExecutionContext, Processor};
use crate::query::chunk::Chunk;
use crate::query::cursor::KeyCursor;
use crate::query::error::QueryError;
use crate::query::schema::RowDataType;

// ============================================================================
// Cursor Source
// ============================================================================

/// Pulls chunks from a cursor and sends them downstream
pub struct CursorSource {
    cursor: Box<dyn KeyCursor>,
    partition: usize,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    chunks: u64,
    rows: u64,
    closed: bool,
}

impl CursorSource {
    /// Source over `cursor`, the cursor of `partition`
    pub fn new(cursor: Box<dyn KeyCursor>, partition: usize) -> Self {
        let outputs = vec![OutputPort::new(cursor.schema().clone())];
        Self {
            cursor,
            partition,
            inputs: Vec::new(),
            outputs,
            chunks: 0,
            rows: 0,
            closed: false,
        }
    }

    /// Output port, for wiring
    pub fn output(&mut self) -> &mut OutputPort {
        &mut self.outputs[0]
    }

    async fn run(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }
            let Some((chunk, _)) = self.cursor.next_chunk()? else {
                return Ok(());
            };
            let rows = chunk.len() as u64;
            match self.outputs[0].send(chunk, &ctx.token).await? {
                SendStatus::Sent => {
                    self.chunks += 1;
                    self.rows += rows;
                }
                SendStatus::Cancelled | SendStatus::Disconnected => return Ok(()),
            }
            // cursors are synchronous; let siblings run between chunks
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl Processor for CursorSource {
    fn name(&self) -> &'static str {
        "CursorSource"
    }

    fn inputs(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn outputs(&mut self) -> &mut [OutputPort] {
        &mut self.outputs
    }

    async fn work(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        let result = self.run(ctx).await;
        self.cursor.close();
        close_outputs(self);
        tracing::debug!(
            partition = self.partition,
            cursor = self.cursor.name(),
            chunks = self.chunks,
            rows = self.rows,
            "Cursor source done"
        );
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cursor.close();
        close_outputs(self);
    }

    fn explain(&self) -> Vec<(String, String)> {
        vec![
            ("partition".to_string(), self.partition.to_string()),
            ("cursor".to_string(), self.cursor.name().to_string()),
        ]
    }
}

// ============================================================================
// Chunk Source
// ============================================================================

/// Sends a fixed list of chunks
pub struct ChunkSource {
    chunks: VecDeque<Chunk>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
}

impl ChunkSource {
    /// Source replaying `chunks` with `schema`
    pub fn new(schema: Arc<RowDataType>, chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into(),
            inputs: Vec::new(),
            outputs: vec![OutputPort::new(schema)],
        }
    }

    /// Output port, for wiring
    pub fn output(&mut self) -> &mut OutputPort {
        &mut self.outputs[0]
    }
}

#[async_trait::async_trait]
impl Processor for ChunkSource {
    fn name(&self) -> &'static str {
        "ChunkSource"
    }

    fn inputs(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    fn outputs(&mut self) -> &mut [OutputPort] {
        &mut self.outputs
    }

    async fn work(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        while let Some(chunk) = self.chunks.pop_front() {
            if self.outputs[0].send(chunk, &ctx.token).await? != SendStatus::Sent {
                break;
            }
        }
        close_outputs(self);
        Ok(())
    }

    fn close(&mut self) {
        self.chunks.clear();
        close_outputs(self);
    }
}
