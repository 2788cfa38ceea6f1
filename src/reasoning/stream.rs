//! Pull-based view of a running reasoning loop
//!
//! The loop runs on its own task and pushes each finished step into a
//! channel of capacity one, so it can be at most one step ahead of the
//! consumer. Dropping the stream closes the channel, which the loop treats
//! as cancellation.

use crate::error::AgentError;
use crate::models::{ReasoningResult, ReasoningStep};
use crate::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct ReasoningStream {
    steps: mpsc::Receiver<ReasoningStep>,
    handle: JoinHandle<Result<ReasoningResult>>,
}

impl ReasoningStream {
    pub(crate) fn new(
        steps: mpsc::Receiver<ReasoningStep>,
        handle: JoinHandle<Result<ReasoningResult>>,
    ) -> Self {
        Self { steps, handle }
    }

    /// Next completed step, or `None` once the loop has stopped emitting.
    pub async fn next_step(&mut self) -> Option<ReasoningStep> {
        self.steps.recv().await
    }

    /// Wait for the final result, discarding any steps not yet pulled.
    pub async fn finish(mut self) -> Result<ReasoningResult> {
        while self.steps.recv().await.is_some() {}

        self.handle
            .await
            .map_err(|e| AgentError::Reasoning(format!("Reasoning task failed: {}", e)))?
    }
}
