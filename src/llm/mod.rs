//! LLM provider contracts
//!
//! The reasoning loop and the memory pipeline only see these traits.
//! A completion either answers in text or asks for tool calls; the two
//! branches are separate variants rather than optional fields.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod gemini;
pub mod mock;

pub use gemini::GeminiClient;
pub use mock::ScriptedLlm;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Tool, content)
    }
}

/// Tool description handed to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Empty means the model must answer in text
    pub tools: Vec<ToolSchema>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            temperature,
            max_output_tokens: 1024,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ProposedToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    Answer(String),
    ToolCalls(Vec<ProposedToolCall>),
}

impl LlmResponse {
    /// Text of an answer; tool-call responses carry none
    pub fn into_text(self) -> Option<String> {
        match self {
            LlmResponse::Answer(text) => Some(text),
            LlmResponse::ToolCalls(_) => None,
        }
    }
}

/// Chat completion with optional tool use
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse>;

    fn name(&self) -> &str;
}

/// Text to fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}
