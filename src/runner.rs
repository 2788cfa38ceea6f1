//! Agent runner
//!
//! One request/response cycle:
//!
//! INPUT → RECALL + PREFERENCES + FINANCIAL CONTEXT → REASON → REPLY → LEARN
//!
//! Context failures degrade the reply instead of failing it. Learning runs
//! after the reply on its own task and only logs its failures.

use crate::context::FinancialContextProvider;
use crate::conversation::format_transcript;
use crate::error::AgentError;
use crate::llm::ChatMessage;
use crate::memory::{MemoryManager, RecallOptions};
use crate::models::{MemoryType, PendingConfirmation, ReasoningResult, StopReason, ToolCallRecord};
use crate::reasoning::{CancellationFlag, ReasoningEngine, ReasoningRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const SYSTEM_ERROR_REPLY: &str = "I couldn't complete that because of a system error.";
const CANCELLED_REPLY: &str = "The request was cancelled before an answer was ready.";

/// Importance given to the memory that records a whole turn
const TURN_MEMORY_IMPORTANCE: f32 = 0.2;
/// Messages handed to fact and preference extraction
const LEARNING_WINDOW: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub query: String,
    /// Earlier turns of the conversation, oldest first
    pub history: Vec<ChatMessage>,
    pub cancellation: CancellationFlag,
}

impl AgentRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Answered,
    /// Answered without some supporting context
    Degraded,
    PendingConfirmation,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub answer: String,
    pub confidence: f32,
    pub status: ReplyStatus,
    pub memories_used: usize,
    /// Context sources that could not be loaded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningResult>,
    pub execution_time_ms: u64,
}

impl AgentReply {
    fn failed(error: &AgentError, started: Instant) -> Self {
        let answer = match error {
            AgentError::Cancelled => CANCELLED_REPLY,
            _ => SYSTEM_ERROR_REPLY,
        };

        Self {
            answer: answer.to_string(),
            confidence: 0.0,
            status: ReplyStatus::Failed,
            memories_used: 0,
            degraded: Vec::new(),
            reasoning: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

pub struct AgentRunner {
    memory: Arc<MemoryManager>,
    engine: Arc<ReasoningEngine>,
    context: Arc<dyn FinancialContextProvider>,
}

impl AgentRunner {
    pub fn new(
        memory: Arc<MemoryManager>,
        engine: Arc<ReasoningEngine>,
        context: Arc<dyn FinancialContextProvider>,
    ) -> Self {
        Self {
            memory,
            engine,
            context,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn engine(&self) -> &Arc<ReasoningEngine> {
        &self.engine
    }

    /// Answer one query. Never returns an error: fatal failures become a
    /// `Failed` reply with a generic message.
    pub async fn handle(&self, request: AgentRequest) -> AgentReply {
        let started = Instant::now();
        info!(query_len = request.query.len(), "Handling request");

        let (recalled, preferences, financial) = tokio::join!(
            self.memory.recall(&request.query, RecallOptions::default()),
            self.memory.get_preferences(),
            self.context.get_context(),
        );

        let mut degraded = Vec::new();

        let memories = recalled.unwrap_or_else(|e| {
            warn!(error = %e, "Memory recall failed, continuing without memories");
            degraded.push("memories".to_string());
            Vec::new()
        });
        let preferences = preferences.unwrap_or_else(|e| {
            warn!(error = %e, "Loading preferences failed, continuing without them");
            degraded.push("preferences".to_string());
            Vec::new()
        });
        let financial = financial.unwrap_or_else(|e| {
            warn!(error = %e, "Financial context unavailable, continuing without it");
            degraded.push("financial_context".to_string());
            String::new()
        });

        let memories_used = memories.len();
        let reasoning_request = ReasoningRequest::new(request.query)
            .with_messages(request.history)
            .with_memories(memories)
            .with_preferences(preferences)
            .with_financial_context(financial)
            .with_cancellation(request.cancellation);

        let result = match self.engine.reason(reasoning_request).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Reasoning failed");
                return AgentReply::failed(&e, started);
            }
        };

        let status = if result.stop_reason == StopReason::PendingConfirmation {
            ReplyStatus::PendingConfirmation
        } else if !degraded.is_empty() {
            ReplyStatus::Degraded
        } else {
            ReplyStatus::Answered
        };

        info!(
            status = ?status,
            confidence = result.confidence,
            memories_used = memories_used,
            "Request handled"
        );

        AgentReply {
            answer: result.final_answer.clone(),
            confidence: result.confidence,
            status,
            memories_used,
            degraded,
            reasoning: Some(result),
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// `handle`, then learn from the finished turn in the background.
    pub async fn respond(self: &Arc<Self>, request: AgentRequest) -> AgentReply {
        let mut turn = request.history.clone();
        turn.push(ChatMessage::user(request.query.clone()));

        let reply = self.handle(request).await;
        if reply.status != ReplyStatus::Failed {
            turn.push(ChatMessage::assistant(reply.answer.clone()));
            self.spawn_learning(turn);
        }
        reply
    }

    pub fn spawn_learning(self: &Arc<Self>, conversation: Vec<ChatMessage>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.learn_from_turn(&conversation).await })
    }

    /// Persist what the last turn taught us. Each step fails independently.
    pub async fn learn_from_turn(&self, conversation: &[ChatMessage]) {
        if conversation.is_empty() {
            return;
        }
        let window_start = conversation.len().saturating_sub(LEARNING_WINDOW);
        let window = &conversation[window_start..];

        let turn_start = conversation.len().saturating_sub(2);
        let summary = format_transcript(&conversation[turn_start..]);
        if let Err(e) = self
            .memory
            .store(summary.trim(), MemoryType::Conversation, Some(TURN_MEMORY_IMPORTANCE))
            .await
        {
            warn!(error = %e, "Failed to store conversation memory");
        }

        if let Err(e) = self.memory.extract_facts(window).await {
            warn!(error = %e, "Fact extraction failed");
        }

        if let Err(e) = self.memory.learn_preferences(window).await {
            warn!(error = %e, "Preference learning failed");
        }

        match self.memory.consolidate_if_needed().await {
            Ok(0) => {}
            Ok(merged) => info!(merged = merged, "Consolidated memories after turn"),
            Err(e) => warn!(error = %e, "Consolidation failed"),
        }
    }

    /// Run a write the user approved after a `PendingConfirmation` reply.
    pub async fn confirm(&self, pending: &PendingConfirmation) -> ToolCallRecord {
        self.engine.execute_confirmed(pending).await
    }
}
