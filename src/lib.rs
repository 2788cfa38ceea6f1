//! Ledger Agent Core
//!
//! Cognitive core of a bookkeeping assistant:
//! - Semantic memory: embeds, recalls, consolidates and forgets knowledge,
//!   and learns facts and preferences from conversations
//! - Reasoning: a bounded loop over ledger tools with deterministic
//!   validation and a confidence score
//!
//! REQUEST CYCLE:
//! RECALL → PROMPT → PLAN → ACT → VALIDATE → (REPLAN?) → ANSWER → LEARN

pub mod api;
pub mod config;
pub mod context;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod reasoning;
pub mod runner;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use memory::MemoryManager;
pub use models::*;
pub use reasoning::{ReasoningEngine, ReasoningRequest};
pub use runner::{AgentReply, AgentRequest, AgentRunner, ReplyStatus};
