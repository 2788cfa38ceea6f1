use ledger_agent_core::{
    config::{AgentConfig, EmbeddingConfig},
    context::StaticContextProvider,
    embedding::{EmbeddingService, HashingEmbedder},
    llm::{mock::ScriptedLlm, ChatMessage, CompletionRequest, LlmResponse, ProposedToolCall},
    memory::{InMemoryMemoryStore, MemoryManager},
    models::MemoryType,
    reasoning::ReasoningEngine,
    runner::{AgentRequest, AgentRunner},
    tools::{Tool, ToolCategory, ToolRegistry},
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_DIMENSIONS: usize = 256;

/// Offline stand-in for the ledger's invoice search
struct DemoInvoices;

#[async_trait]
impl Tool for DemoInvoices {
    fn name(&self) -> &'static str {
        "search_invoices"
    }

    fn description(&self) -> &'static str {
        "Search invoices by status or customer"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["open", "paid", "overdue"]}
            }
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Invoices
    }

    async fn execute(&self, _arguments: &Value) -> ledger_agent_core::Result<Value> {
        Ok(json!({
            "invoices": [{
                "number": "INV-1042",
                "customer": "Acme Corp",
                "status": "overdue",
                "total": 1200.0,
                "lines": [{"description": "Consulting", "amount": 1200.0}]
            }]
        }))
    }
}

/// Plans one invoice search, then answers; also serves the extraction prompts.
fn demo_script(request: &CompletionRequest, _index: usize) -> ledger_agent_core::Result<LlmResponse> {
    let system = request
        .messages
        .first()
        .map(|m| m.content.as_str())
        .unwrap_or_default();

    if system.starts_with("You extract durable facts") {
        return Ok(LlmResponse::Answer(
            r#"[{"fact": "Acme Corp has an overdue invoice INV-1042 for 1200.00", "importance": 0.7}]"#
                .to_string(),
        ));
    }
    if system.starts_with("You extract user preferences") {
        return Ok(LlmResponse::Answer(
            r#"[{"key": "report_frequency", "value": "weekly", "confidence": 0.8}]"#.to_string(),
        ));
    }

    let has_tool_result = request
        .messages
        .iter()
        .any(|m| m.content.starts_with("[search_invoices]"));

    if request.tools.is_empty() || has_tool_result {
        Ok(LlmResponse::Answer(
            "Invoice INV-1042 from \"Acme Corp\" is overdue (1200.00). I'll keep sending weekly reports."
                .to_string(),
        ))
    } else {
        Ok(LlmResponse::ToolCalls(vec![ProposedToolCall::new(
            "search_invoices",
            json!({"status": "overdue"}),
        )]))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Ledger agent demo starting (offline)");

    let config = AgentConfig::from_env()?;

    let llm = Arc::new(ScriptedLlm::new(demo_script));
    let embeddings = Arc::new(EmbeddingService::new(
        Arc::new(HashingEmbedder::new(DEMO_DIMENSIONS)),
        &EmbeddingConfig {
            dimensions: DEMO_DIMENSIONS,
            ..config.embedding.clone()
        },
    )?);

    let memory = Arc::new(MemoryManager::new(
        Arc::new(InMemoryMemoryStore::new()),
        embeddings,
        llm.clone(),
        config.memory.clone(),
    ));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(DemoInvoices));
    let engine = Arc::new(ReasoningEngine::new(
        llm,
        Arc::new(registry),
        config.reasoning.clone(),
    ));

    let runner = AgentRunner::new(
        memory.clone(),
        engine,
        Arc::new(StaticContextProvider::new(
            "Cash: 12,400.00 EUR\nOpen receivables: 1 invoice, 1,200.00 EUR",
        )),
    );

    memory
        .store("The user wants weekly reports", MemoryType::Preference, Some(0.6))
        .await?;

    let query = "Which invoices are overdue? Send me reports weekly.";
    let reply = runner.handle(AgentRequest::new(query)).await;

    println!("\n=== AGENT REPLY ===");
    println!("Status: {:?}", reply.status);
    println!("Confidence: {:.2}", reply.confidence);
    println!("Answer: {}", reply.answer);

    if let Some(reasoning) = &reply.reasoning {
        println!("\nReasoning Trace:");
        for (i, step) in reasoning.steps.iter().enumerate() {
            println!("  {}: [{}] {}", i + 1, step.stage, step.description);
        }
        println!("Sources: {:?}", reasoning.sources);
    }

    runner
        .learn_from_turn(&[
            ChatMessage::user(query),
            ChatMessage::assistant(reply.answer.clone()),
        ])
        .await;

    let stats = memory.get_stats().await?;
    println!("\n=== MEMORY ===");
    println!("Memories: {} ({:?})", stats.count, stats.by_type);
    for preference in memory.get_preferences().await? {
        println!("Preference {} = {} ({:.2})", preference.key, preference.value, preference.confidence);
    }

    Ok(())
}
