//! Pipeline executor
//!
//! Runs every processor as its own tokio task. The first failing processor
//! cancels its siblings through a child token of the query's abort token;
//! an external abort makes every processor return cleanly.

use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::processor::{ExecutionContext, Processor};
use crate::query::error::QueryError;

/// Runs a set of wired processors to completion
pub struct PipelineExecutor {
    /// Processors waiting to run, or returned by their tasks after running
    processors: Vec<Box<dyn Processor>>,
    executed: bool,
    released: bool,
}

impl PipelineExecutor {
    /// Executor over already connected processors
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Self {
            processors,
            executed: false,
            released: false,
        }
    }

    /// Number of processors in the pipeline
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// True for an empty pipeline
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Diagnostic description of every processor
    pub fn explain(&self) -> Vec<(&'static str, Vec<(String, String)>)> {
        self.processors
            .iter()
            .map(|p| (p.name(), p.explain()))
            .collect()
    }

    fn check_wiring(&mut self) -> Result<(), QueryError> {
        for p in &mut self.processors {
            let name = p.name();
            if p.inputs().iter().any(|i| !i.is_connected()) {
                return Err(QueryError::validation(format!(
                    "processor {} has an unconnected input",
                    name
                )));
            }
            if p.outputs().iter().any(|o| !o.is_connected()) {
                return Err(QueryError::validation(format!(
                    "processor {} has an unconnected output",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Run every processor until all of them terminate
    ///
    /// Returns the first error reported by a processor. An abort through
    /// `abort` is not an error.
    pub async fn execute(&mut self, abort: &CancellationToken) -> Result<(), QueryError> {
        if self.executed {
            return Err(QueryError::internal("pipeline executed twice"));
        }
        self.executed = true;
        self.check_wiring()?;

        let started = Instant::now();
        let token = abort.child_token();
        let mut tasks = JoinSet::new();

        for mut processor in self.processors.drain(..) {
            let ctx = ExecutionContext::new(token.clone());
            tasks.spawn(async move {
                let name = processor.name();
                tracing::debug!(processor = name, "Processor started");
                let result = processor.work(&ctx).await;
                tracing::debug!(processor = name, ok = result.is_ok(), "Processor finished");
                (processor, result)
            });
        }

        let mut first_error: Option<QueryError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((processor, result)) => {
                    if let Err(e) = result {
                        if first_error.is_none() {
                            tracing::error!(
                                processor = processor.name(),
                                error = %e,
                                "Processor failed, cancelling pipeline"
                            );
                            token.cancel();
                            first_error = Some(e);
                        }
                    }
                    self.processors.push(processor);
                }
                Err(e) => {
                    if first_error.is_none() {
                        tracing::error!(error = %e, "Processor task panicked");
                        token.cancel();
                        first_error = Some(QueryError::internal(format!(
                            "processor task panicked: {}",
                            e
                        )));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                if abort.is_cancelled() {
                    tracing::warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Pipeline cancelled"
                    );
                } else {
                    tracing::info!(
                        processors = self.processors.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Pipeline completed"
                    );
                }
                Ok(())
            }
        }
    }

    /// Force-close every processor; safe to call more than once
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for p in &mut self.processors {
            p.close();
        }
        tracing::debug!(processors = self.processors.len(), "Pipeline released");
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.release();
    }
}
