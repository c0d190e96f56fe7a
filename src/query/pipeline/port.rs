//! Typed ports
//!
//! A port pair is a single-producer single-consumer bounded channel of
//! chunks bound to a row schema. Sends and receives both observe the
//! query's cancellation token so an aborted query never leaves a producer
//! parked on a full channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::query::chunk::Chunk;
use crate::query::error::QueryError;
use crate::query::schema::RowDataType;

/// Default channel depth between two processors
pub const DEFAULT_PORT_CAPACITY: usize = 1;

/// Result of a send on an output port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Chunk delivered to the channel
    Sent,
    /// Query cancelled while waiting for capacity
    Cancelled,
    /// Consumer is gone, nothing more will be read
    Disconnected,
}

/// Producing end of a port
#[derive(Debug)]
pub struct OutputPort {
    schema: Arc<RowDataType>,
    tx: Option<mpsc::Sender<Chunk>>,
    closed: bool,
}

impl OutputPort {
    /// Unconnected output port for `schema`
    pub fn new(schema: Arc<RowDataType>) -> Self {
        Self {
            schema,
            tx: None,
            closed: false,
        }
    }

    /// Schema of the chunks sent on this port
    pub fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    /// True once `connect` wired this port
    pub fn is_connected(&self) -> bool {
        self.tx.is_some() || self.closed
    }

    /// Send `chunk`, waiting for capacity unless `token` fires first
    pub async fn send(
        &self,
        chunk: Chunk,
        token: &CancellationToken,
    ) -> Result<SendStatus, QueryError> {
        let Some(tx) = &self.tx else {
            if self.closed {
                return Err(QueryError::internal("send on a closed output port"));
            }
            return Err(QueryError::validation("send on an unconnected output port"));
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(SendStatus::Cancelled),
            res = tx.send(chunk) => match res {
                Ok(()) => Ok(SendStatus::Sent),
                Err(_) => Ok(SendStatus::Disconnected),
            },
        }
    }

    /// Signal end of stream to the consumer
    pub fn close(&mut self) {
        self.tx = None;
        self.closed = true;
    }
}

/// Consuming end of a port
#[derive(Debug)]
pub struct InputPort {
    schema: Arc<RowDataType>,
    rx: Option<mpsc::Receiver<Chunk>>,
}

impl InputPort {
    /// Unconnected input port for `schema`
    pub fn new(schema: Arc<RowDataType>) -> Self {
        Self { schema, rx: None }
    }

    /// Schema of the chunks received on this port
    pub fn schema(&self) -> &Arc<RowDataType> {
        &self.schema
    }

    /// True once `connect` wired this port
    pub fn is_connected(&self) -> bool {
        self.rx.is_some()
    }

    /// Next chunk, or `None` at end of stream or on cancellation
    pub async fn recv(&mut self, token: &CancellationToken) -> Result<Option<Chunk>, QueryError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(QueryError::validation("receive on an unconnected input port"));
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(None),
            chunk = rx.recv() => Ok(chunk),
        }
    }

    /// Stop accepting chunks; pending and future sends see a disconnect
    pub fn close(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            rx.close();
        }
    }
}

/// Wire `output` to `input` with the default capacity
pub fn connect(output: &mut OutputPort, input: &mut InputPort) -> Result<(), QueryError> {
    connect_with_capacity(output, input, DEFAULT_PORT_CAPACITY)
}

/// Wire `output` to `input`; fails when the schemas are incompatible or
/// either side is already wired
pub fn connect_with_capacity(
    output: &mut OutputPort,
    input: &mut InputPort,
    capacity: usize,
) -> Result<(), QueryError> {
    if !output.schema.is_compatible(&input.schema) {
        return Err(QueryError::validation(format!(
            "cannot connect ports: output has {} columns {:?}, input expects {} columns {:?}",
            output.schema.len(),
            output
                .schema
                .fields()
                .iter()
                .map(|f| f.data_type)
                .collect::<Vec<_>>(),
            input.schema.len(),
            input
                .schema
                .fields()
                .iter()
                .map(|f| f.data_type)
                .collect::<Vec<_>>(),
        )));
    }
    if output.is_connected() || input.is_connected() {
        return Err(QueryError::validation("port is already connected"));
    }
    let (tx, rx) = mpsc::channel(capacity.max(1));
    output.tx = Some(tx);
    input.rx = Some(rx);
    Ok(())
}
