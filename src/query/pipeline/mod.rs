//! Dataflow pipeline
//!
//! Processors connected by typed ports, each running as its own task:
//!
//! ```text
//! CursorSource ─┐
//! CursorSource ─┼─ (StreamAggregateTransform per partition) ─> CollectSink
//! CursorSource ─┘
//! ```

pub mod executor;
pub mod port;
pub mod processor;
pub mod sink;
pub mod source;

pub use executor::PipelineExecutor;
pub use port::{connect, connect_with_capacity, InputPort, OutputPort, SendStatus};
pub use processor::{ExecutionContext, Processor};
pub use sink::{CollectSink, SinkHandle};
pub use source::{ChunkSource, CursorSource};
