//! Scripted LLM for development & testing
//!
//! Keeps the system functional without a network dependency: each call is
//! answered by a closure that sees the request and the call index.

use crate::llm::{CompletionRequest, LlmProvider, LlmResponse};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

type Script = dyn Fn(&CompletionRequest, usize) -> Result<LlmResponse> + Send + Sync;

pub struct ScriptedLlm {
    script: Box<Script>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> Result<LlmResponse> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text
    pub fn answering(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(LlmResponse::Answer(text.clone())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in call order
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = (self.script)(&request, index);
        self.requests.lock().await.push(request);
        response
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
