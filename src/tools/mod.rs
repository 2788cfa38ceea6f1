//! Tool trait and registry
//!
//! Tools are the agent's only way to touch ledger data. Each declares a JSON
//! parameter schema that the registry checks before execution, and flags
//! whether it has side effects or needs user confirmation.

pub mod ledger;
pub mod schema;

pub use ledger::{create_default_registry, LedgerApiClient};

use crate::error::AgentError;
use crate::llm::ToolSchema;
use crate::Result;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Invoices,
    Customers,
    Expenses,
    Reports,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolCategory::Invoices => "invoices",
            ToolCategory::Customers => "customers",
            ToolCategory::Expenses => "expenses",
            ToolCategory::Reports => "reports",
        };
        write!(f, "{}", s)
    }
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;
    fn category(&self) -> ToolCategory;

    /// Writes ledger state; never run concurrently with other calls
    fn has_side_effects(&self) -> bool {
        false
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn execute(&self, arguments: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub category: ToolCategory,
    pub has_side_effects: bool,
    pub requires_confirmation: bool,
}

impl ToolDescriptor {
    fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
            category: tool.category(),
            has_side_effects: tool.has_side_effects(),
            requires_confirmation: tool.requires_confirmation(),
        }
    }

    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Outcome of one tool run; failures are values, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecution {
    pub success: bool,
    /// Text handed back to the model
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn succeeded(data: Value) -> Self {
        let result = match &data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            success: true,
            result,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            result: format!("Error: {}", error),
            data: None,
            error: Some(error),
        }
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors sorted by name, optionally restricted to some categories.
    pub fn list(&self, categories: Option<&[ToolCategory]>) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .filter(|tool| categories.map_or(true, |c| c.contains(&tool.category())))
            .map(|tool| ToolDescriptor::from_tool(tool.as_ref()))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn schemas(&self, categories: Option<&[ToolCategory]>) -> Vec<ToolSchema> {
        self.list(categories)
            .iter()
            .map(ToolDescriptor::to_schema)
            .collect()
    }

    /// Unknown tools never require confirmation; they fail at execution.
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map_or(false, |tool| tool.requires_confirmation())
    }

    pub fn has_side_effects(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map_or(false, |tool| tool.has_side_effects())
    }

    /// Check that `name` exists and `arguments` fit its schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<()> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        schema::validate_arguments(name, &tool.parameters(), arguments)
    }

    /// Validate and run a tool. Errors and panics come back as a failed
    /// `ToolExecution`.
    pub async fn execute(&self, name: &str, arguments: &Value) -> ToolExecution {
        if let Err(e) = self.validate(name, arguments) {
            warn!(tool = %name, error = %e, "Rejected tool call");
            return ToolExecution::failed(e.to_string());
        }

        let Some(tool) = self.get(name) else {
            return ToolExecution::failed(AgentError::ToolNotFound(name.to_string()).to_string());
        };

        debug!(tool = %name, "Executing tool");

        match AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await {
            Ok(Ok(data)) => ToolExecution::succeeded(data),
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool failed");
                ToolExecution::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tool = %name, panic = %message, "Tool panicked");
                ToolExecution::failed(
                    AgentError::ToolExecution(format!("{} panicked: {}", name, message))
                        .to_string(),
                )
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
