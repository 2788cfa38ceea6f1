//! Reasoning engine
//!
//! Bounded PLAN → ACT → VALIDATE loop followed by one ANSWER call:
//!
//! * PLAN asks the model for tool calls or an answer.
//! * ACT runs the proposed tools. Read-only tools run concurrently, tools
//!   with side effects run one after another, and tools that need
//!   confirmation stop the loop instead of running.
//! * VALIDATE applies deterministic rules. Failures go back to PLAN while
//!   iterations remain.
//! * ANSWER synthesizes the final text from the whole transcript.
//!
//! Each LLM call is retried once, and each step has its own timeout. In ACT
//! the deadline spans every tool call of the step; calls it cuts off are
//! recorded as failed. A timed-out step fails alone and the loop carries on.
//! An LLM that is still unreachable after the retry aborts the run.

pub mod cancel;
pub mod confidence;
pub mod planner;
pub mod stream;
pub mod validation;

pub use cancel::CancellationFlag;
pub use stream::ReasoningStream;
pub use validation::{ValidationRule, Validator};

use crate::config::ReasoningConfig;
use crate::error::AgentError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, LlmResponse, ProposedToolCall};
use crate::models::{
    PendingConfirmation, ReasoningResult, ReasoningStage, ReasoningStep, ScoredMemory, StopReason,
    ToolCallRecord, UserPreference,
};
use crate::prompt::{build_system_prompt, PromptContext};
use crate::tools::ToolRegistry;
use crate::Result;
use confidence::ConfidenceSignals;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use validation::ValidationInput;

/// Input to one reasoning run
#[derive(Clone, Default)]
pub struct ReasoningRequest {
    pub query: String,
    /// Built from memories, preferences and financial context when empty
    pub system_prompt: String,
    /// Prior conversation turns, oldest first
    pub messages: Vec<ChatMessage>,
    pub financial_context: String,
    pub memories: Vec<ScoredMemory>,
    pub preferences: Vec<UserPreference>,
    pub cancellation: CancellationFlag,
}

impl ReasoningRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_financial_context(mut self, context: impl Into<String>) -> Self {
        self.financial_context = context.into();
        self
    }

    pub fn with_memories(mut self, memories: Vec<ScoredMemory>) -> Self {
        self.memories = memories;
        self
    }

    pub fn with_preferences(mut self, preferences: Vec<UserPreference>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Ordered step log, mirrored to a stream consumer when there is one
struct StepLog {
    steps: Vec<ReasoningStep>,
    sink: Option<mpsc::Sender<ReasoningStep>>,
}

impl StepLog {
    fn new(sink: Option<mpsc::Sender<ReasoningStep>>) -> Self {
        Self {
            steps: Vec::new(),
            sink,
        }
    }

    async fn push(&mut self, step: ReasoningStep) -> Result<()> {
        debug!(stage = %step.stage, succeeded = step.succeeded, "{}", step.description);
        self.steps.push(step.clone());

        if let Some(sink) = &self.sink {
            // Receiver gone: the consumer dropped the stream
            sink.send(step).await.map_err(|_| AgentError::Cancelled)?;
        }
        Ok(())
    }

    fn consumer_gone(&self) -> bool {
        self.sink.as_ref().map_or(false, |s| s.is_closed())
    }
}

struct ActOutcome {
    records: Vec<ToolCallRecord>,
    pending: Option<PendingConfirmation>,
    timed_out: bool,
}

pub struct ReasoningEngine {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    validator: Validator,
    config: ReasoningConfig,
}

impl ReasoningEngine {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: ReasoningConfig) -> Self {
        Self {
            llm,
            tools,
            validator: Validator::with_default_rules(),
            config,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningResult> {
        self.run_loop(request, None).await
    }

    /// Run on a background task, yielding each step as it completes.
    pub fn reason_stream(self: &Arc<Self>, request: ReasoningRequest) -> ReasoningStream {
        let (tx, rx) = mpsc::channel(1);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_loop(request, Some(tx)).await });
        ReasoningStream::new(rx, handle)
    }

    /// Run a tool call the user approved after a `PendingConfirmation` stop.
    pub async fn execute_confirmed(&self, pending: &PendingConfirmation) -> ToolCallRecord {
        info!(tool = %pending.tool, "Executing confirmed tool call");
        let call = ProposedToolCall::new(pending.tool.clone(), pending.arguments.clone());
        let started = Instant::now();

        match timeout(self.config.step_timeout, self.run_tool(&call)).await {
            Ok(record) => record,
            Err(_) => {
                warn!(tool = %call.name, "Confirmed tool call timed out");
                ToolCallRecord::failed(
                    call.name,
                    call.arguments,
                    format!(
                        "Timed out after {} ms",
                        self.config.step_timeout.as_millis()
                    ),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    async fn run_loop(
        &self,
        request: ReasoningRequest,
        sink: Option<mpsc::Sender<ReasoningStep>>,
    ) -> Result<ReasoningResult> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AgentError::Reasoning("Query must not be empty".to_string()));
        }

        let started = Instant::now();
        let cancellation = request.cancellation.clone();
        let mut log = StepLog::new(sink);

        let system_prompt = if request.system_prompt.trim().is_empty() {
            build_system_prompt(&PromptContext {
                memories: &request.memories,
                preferences: &request.preferences,
                financial_context: &request.financial_context,
            })
        } else {
            request.system_prompt.clone()
        };

        let mut transcript = Vec::with_capacity(request.messages.len() + 4);
        transcript.push(ChatMessage::system(system_prompt));
        transcript.extend(request.messages.iter().cloned());
        transcript.push(ChatMessage::user(query));

        let mut sources: BTreeSet<String> = request
            .memories
            .iter()
            .map(|m| format!("memory:{}", m.memory.id))
            .collect();
        if !request.financial_context.trim().is_empty() {
            sources.insert("financial_context".to_string());
        }
        if !request.preferences.is_empty() {
            sources.insert("preferences".to_string());
        }

        let tool_schemas = self.tools.schemas(None);
        let mut tools_used = BTreeSet::new();
        let mut gathered: Vec<ToolCallRecord> = Vec::new();
        let mut iteration: u32 = 0;
        let mut draft: Option<String> = None;
        let mut last_validation_passed = true;
        let mut failed_validation_rounds = 0u32;
        let mut timed_out_steps = 0u32;
        let mut stop_reason: Option<StopReason> = None;
        let mut pending: Option<PendingConfirmation> = None;

        info!(
            max_iterations = self.config.max_iterations,
            tools = tool_schemas.len(),
            memories = request.memories.len(),
            "Reasoning started"
        );

        while iteration < self.config.max_iterations {
            self.check_cancelled(&cancellation, &log)?;
            iteration += 1;

            // ---- PLAN ----
            let plan_request = planner::planning_request(
                &transcript,
                tool_schemas.clone(),
                self.config.planning_temperature,
            );
            let decision = match timeout(
                self.config.step_timeout,
                self.complete_with_retry(plan_request),
            )
            .await
            {
                Err(_) => {
                    timed_out_steps += 1;
                    warn!(iteration = iteration, "Planning step timed out");
                    log.push(
                        ReasoningStep::new(
                            ReasoningStage::Planning,
                            format!(
                                "Planning timed out after {} ms",
                                self.config.step_timeout.as_millis()
                            ),
                        )
                        .failed(),
                    )
                    .await?;
                    continue;
                }
                Ok(result) => result?,
            };

            let (calls, proposed_answer) = match decision {
                LlmResponse::Answer(text) => {
                    log.push(ReasoningStep::new(
                        ReasoningStage::Planning,
                        "Enough information gathered, drafting answer",
                    ))
                    .await?;
                    (Vec::new(), Some(text))
                }
                LlmResponse::ToolCalls(calls) => {
                    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                    log.push(ReasoningStep::new(
                        ReasoningStage::Planning,
                        format!("Proposed {} tool call(s): {}", calls.len(), names.join(", ")),
                    ))
                    .await?;
                    (calls, None)
                }
            };

            self.check_cancelled(&cancellation, &log)?;

            // ---- ACT ----
            let mut step_calls = Vec::new();
            if !calls.is_empty() {
                transcript.push(ChatMessage::assistant(planner::describe_calls(&calls)));

                let outcome = self.act(calls).await;
                if outcome.timed_out {
                    timed_out_steps += 1;
                }

                for record in &outcome.records {
                    if self.tools.get(&record.tool).is_some() {
                        tools_used.insert(record.tool.clone());
                    }
                    if record.success {
                        sources.insert(format!("tool:{}", record.tool));
                    }
                    transcript.push(planner::tool_result_message(record));
                }

                let failures = outcome.records.iter().filter(|r| !r.success).count();
                let mut description = format!(
                    "Ran {} tool call(s), {} failed",
                    outcome.records.len(),
                    failures
                );
                if let Some(p) = &outcome.pending {
                    description.push_str(&format!("; {} awaits confirmation", p.tool));
                }

                let mut step = ReasoningStep::new(ReasoningStage::Acting, description)
                    .with_tool_calls(outcome.records.clone());
                if outcome.timed_out {
                    step = step.failed();
                }
                log.push(step).await?;

                step_calls = outcome.records;
                gathered.extend(step_calls.iter().cloned());

                if outcome.pending.is_some() {
                    pending = outcome.pending;
                    stop_reason = Some(StopReason::PendingConfirmation);
                    break;
                }
            }

            self.check_cancelled(&cancellation, &log)?;

            // ---- VALIDATE ----
            let report = self.validator.validate(&ValidationInput {
                draft_answer: proposed_answer.as_deref(),
                step_calls: &step_calls,
                gathered_calls: &gathered,
                financial_context: &request.financial_context,
            });
            last_validation_passed = report.passed;

            if let Some(text) = &proposed_answer {
                transcript.push(ChatMessage::assistant(text.clone()));
                draft = Some(text.clone());
            }

            if report.passed {
                log.push(ReasoningStep::new(
                    ReasoningStage::Validating,
                    format!("{} check(s) passed", report.checks.len()),
                ))
                .await?;

                if proposed_answer.is_some() {
                    stop_reason = Some(StopReason::Sufficient);
                    break;
                }
            } else {
                failed_validation_rounds += 1;
                warn!(iteration = iteration, issues = ?report.issues, "Validation failed");
                log.push(
                    ReasoningStep::new(
                        ReasoningStage::Validating,
                        format!("Validation failed: {}", report.issues.join("; ")),
                    )
                    .failed(),
                )
                .await?;
                transcript.push(planner::validation_feedback(&report.issues));
            }
        }

        let stop_reason = stop_reason.unwrap_or(StopReason::BudgetExhausted);
        self.check_cancelled(&cancellation, &log)?;

        // ---- ANSWER ----
        let final_answer = match &pending {
            Some(p) => {
                let text = planner::confirmation_message(p);
                log.push(ReasoningStep::new(
                    ReasoningStage::Answering,
                    format!("Waiting for confirmation of {}", p.tool),
                ))
                .await?;
                text
            }
            None => {
                let answer_request = planner::answer_request(
                    &transcript,
                    self.config.answer_temperature,
                    stop_reason == StopReason::BudgetExhausted,
                );

                match timeout(
                    self.config.step_timeout,
                    self.complete_with_retry(answer_request),
                )
                .await
                {
                    Ok(result) => {
                        let text = match result? {
                            LlmResponse::Answer(text) if !text.trim().is_empty() => text,
                            _ => draft
                                .clone()
                                .unwrap_or_else(|| planner::fallback_answer(&gathered)),
                        };
                        log.push(ReasoningStep::new(
                            ReasoningStage::Answering,
                            "Synthesized final answer",
                        ))
                        .await?;
                        text
                    }
                    Err(_) => {
                        timed_out_steps += 1;
                        log.push(
                            ReasoningStep::new(
                                ReasoningStage::Answering,
                                "Answer synthesis timed out",
                            )
                            .failed(),
                        )
                        .await?;
                        match &draft {
                            Some(text) => text.clone(),
                            None => {
                                return Err(AgentError::Reasoning(
                                    "Answer synthesis timed out with no draft answer".to_string(),
                                ))
                            }
                        }
                    }
                }
            }
        };

        let confidence = confidence::score(&ConfidenceSignals {
            final_validation_passed: last_validation_passed,
            failed_validation_rounds,
            tool_calls: gathered.len(),
            failed_tool_calls: gathered.iter().filter(|r| !r.success).count(),
            timed_out_steps,
            stop_reason: Some(stop_reason),
        });

        info!(
            iterations = iteration,
            steps = log.steps.len(),
            tools_used = tools_used.len(),
            confidence = confidence,
            stop_reason = ?stop_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reasoning completed"
        );

        Ok(ReasoningResult {
            final_answer,
            steps: log.steps,
            tools_used,
            iteration_count: iteration,
            confidence,
            sources,
            stop_reason,
            pending_confirmation: pending,
        })
    }

    fn check_cancelled(&self, cancellation: &CancellationFlag, log: &StepLog) -> Result<()> {
        if cancellation.is_cancelled() || log.consumer_gone() {
            info!("Reasoning cancelled");
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// One retry after `retry_backoff`; a second failure is fatal.
    async fn complete_with_retry(&self, request: CompletionRequest) -> Result<LlmResponse> {
        match self.llm.complete(request.clone()).await {
            Ok(response) => Ok(response),
            Err(first) => {
                warn!(error = %first, provider = %self.llm.name(), "LLM call failed, retrying");
                tokio::time::sleep(self.config.retry_backoff).await;

                self.llm.complete(request).await.map_err(|e| {
                    AgentError::Reasoning(format!("LLM unavailable after retry: {}", e))
                })
            }
        }
    }

    async fn act(&self, mut calls: Vec<ProposedToolCall>) -> ActOutcome {
        if calls.len() > self.config.max_tool_calls_per_step {
            warn!(
                proposed = calls.len(),
                limit = self.config.max_tool_calls_per_step,
                "Too many tool calls in one step, dropping the rest"
            );
            calls.truncate(self.config.max_tool_calls_per_step);
        }

        let mut slots: Vec<Option<ToolCallRecord>> = vec![None; calls.len()];
        let mut pending = None;
        let mut concurrent = Vec::new();
        let mut serial = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            if self.tools.get(&call.name).is_none() {
                slots[i] = Some(ToolCallRecord::failed(
                    call.name.clone(),
                    call.arguments.clone(),
                    AgentError::ToolNotFound(call.name.clone()).to_string(),
                    0,
                ));
                continue;
            }

            if self.tools.requires_confirmation(&call.name) {
                if let Err(e) = self.tools.validate(&call.name, &call.arguments) {
                    slots[i] = Some(ToolCallRecord::failed(
                        call.name.clone(),
                        call.arguments.clone(),
                        e.to_string(),
                        0,
                    ));
                } else if pending.is_none() {
                    pending = Some(PendingConfirmation {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                } else {
                    debug!(tool = %call.name, "Dropping second confirmation-gated call");
                }
                continue;
            }

            if self.tools.has_side_effects(&call.name) {
                serial.push(i);
            } else {
                concurrent.push(i);
            }
        }

        // One deadline covers every call in the step.
        let started = Instant::now();
        let calls = &calls;
        let run = async {
            let mut running: FuturesUnordered<_> = concurrent
                .iter()
                .map(|&i| async move { (i, self.run_tool(&calls[i]).await) })
                .collect();
            while let Some((i, record)) = running.next().await {
                slots[i] = Some(record);
            }

            for &i in &serial {
                slots[i] = Some(self.run_tool(&calls[i]).await);
            }
        };
        let timed_out = timeout(self.config.step_timeout, run).await.is_err();

        if timed_out {
            let elapsed = started.elapsed().as_millis() as u64;
            for &i in concurrent.iter().chain(serial.iter()) {
                if slots[i].is_none() {
                    warn!(tool = %calls[i].name, "Tool call cut off by step timeout");
                    slots[i] = Some(ToolCallRecord::failed(
                        calls[i].name.clone(),
                        calls[i].arguments.clone(),
                        format!(
                            "Timed out: step exceeded {} ms",
                            self.config.step_timeout.as_millis()
                        ),
                        elapsed,
                    ));
                }
            }
        }

        ActOutcome {
            records: slots.into_iter().flatten().collect(),
            pending,
            timed_out,
        }
    }

    async fn run_tool(&self, call: &ProposedToolCall) -> ToolCallRecord {
        let started = Instant::now();
        let execution = self.tools.execute(&call.name, &call.arguments).await;

        ToolCallRecord {
            tool: call.name.clone(),
            input: call.arguments.clone(),
            output: execution.data.unwrap_or(serde_json::Value::Null),
            success: execution.success,
            error: execution.error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
