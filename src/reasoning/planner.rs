//! Planning and answering prompts
//!
//! The loop keeps one chat transcript. Each planning call sends it with the
//! tool schemas attached; the final answer call sends it without tools so
//! the model has to reply in text.

use crate::llm::{ChatMessage, CompletionRequest, ProposedToolCall, ToolSchema};
use crate::models::{PendingConfirmation, ToolCallRecord};

const MAX_TOOL_OUTPUT_CHARS: usize = 4000;

const PLANNING_INSTRUCTIONS: &str = "Decide the next step. If you need ledger data you do not have yet, call one or more tools. \
Tools proposed together must not depend on each other's results. \
If the information gathered so far is enough, reply with your answer in plain text instead of calling tools. \
Only cite invoice numbers, customers and amounts that appear in tool results or the financial context.";

const ANSWER_INSTRUCTIONS: &str = "Write the final answer for the user based on the conversation and tool results above. \
Be concise, cite the invoice numbers, customers and amounts you relied on, and say plainly if some data could not be retrieved.";

const BUDGET_NOTE: &str = "The step budget is used up. Answer with what you have and mention anything you could not verify.";

pub fn planning_request(
    transcript: &[ChatMessage],
    tools: Vec<ToolSchema>,
    temperature: f32,
) -> CompletionRequest {
    let mut messages = transcript.to_vec();
    messages.push(ChatMessage::system(PLANNING_INSTRUCTIONS));
    CompletionRequest::new(messages, temperature).with_tools(tools)
}

pub fn answer_request(
    transcript: &[ChatMessage],
    temperature: f32,
    budget_exhausted: bool,
) -> CompletionRequest {
    let mut messages = transcript.to_vec();
    if budget_exhausted {
        messages.push(ChatMessage::system(BUDGET_NOTE));
    }
    messages.push(ChatMessage::system(ANSWER_INSTRUCTIONS));
    CompletionRequest::new(messages, temperature)
}

/// Assistant turn recording which tools the model chose
pub fn describe_calls(calls: &[ProposedToolCall]) -> String {
    calls
        .iter()
        .map(|c| format!("Calling {} with {}", c.name, c.arguments))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn tool_result_message(record: &ToolCallRecord) -> ChatMessage {
    let body = if record.success {
        truncate(&record.output.to_string(), MAX_TOOL_OUTPUT_CHARS)
    } else {
        format!(
            "FAILED: {}",
            record.error.as_deref().unwrap_or("unknown error")
        )
    };
    ChatMessage::tool(format!("[{}] {}", record.tool, body))
}

pub fn validation_feedback(issues: &[String]) -> ChatMessage {
    let mut text = String::from(
        "Validation found problems with the data or draft answer. Fix them before answering:\n",
    );
    for issue in issues {
        text.push_str("- ");
        text.push_str(issue);
        text.push('\n');
    }
    ChatMessage::user(text)
}

/// Reply shown while a write waits for the user's approval
pub fn confirmation_message(pending: &PendingConfirmation) -> String {
    format!(
        "I'm ready to run {} with {}. Please confirm before I make this change.",
        pending.tool, pending.arguments
    )
}

/// Used when the model gives no usable final text and there is no draft
pub fn fallback_answer(gathered: &[ToolCallRecord]) -> String {
    let succeeded: Vec<&str> = gathered
        .iter()
        .filter(|r| r.success)
        .map(|r| r.tool.as_str())
        .collect();

    if succeeded.is_empty() {
        "I wasn't able to gather enough information to answer that.".to_string()
    } else {
        format!(
            "I couldn't finish summarising the results. Data was retrieved from: {}.",
            succeeded.join(", ")
        )
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}… (truncated)", cut)
}
