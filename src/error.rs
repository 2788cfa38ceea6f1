//! Error types for the agent core

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Supporting context (degradable)
    // =============================

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Memory store error: {0}")]
    MemoryStore(String),

    // =============================
    // Tools (captured inline, never fatal)
    // =============================

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // Reasoning (fatal)
    // =============================

    #[error("Reasoning error: {0}")]
    Reasoning(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reasoning cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl AgentError {
    /// Whether this error prevents the agent from producing any answer.
    ///
    /// Memory, embedding and tool failures only degrade the context the
    /// reasoning loop works with; everything else stops the request.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AgentError::Embedding(_)
                | AgentError::MemoryStore(_)
                | AgentError::ToolExecution(_)
                | AgentError::ToolNotFound(_)
                | AgentError::InvalidToolInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_split() {
        assert!(!AgentError::Embedding("down".into()).is_fatal());
        assert!(!AgentError::MemoryStore("locked".into()).is_fatal());
        assert!(!AgentError::ToolNotFound("x".into()).is_fatal());
        assert!(AgentError::Reasoning("llm unreachable".into()).is_fatal());
        assert!(AgentError::Cancelled.is_fatal());
    }
}
