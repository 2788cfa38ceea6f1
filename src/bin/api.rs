use ledger_agent_core::{
    api::start_server,
    config::AgentConfig,
    context::{FinancialContextProvider, LedgerApiContextProvider, StaticContextProvider},
    embedding::{EmbeddingService, HashingEmbedder},
    llm::{gemini::GeminiClient, mock::ScriptedLlm, EmbeddingProvider, LlmProvider},
    memory::{InMemoryMemoryStore, MemoryManager, MemoryStore, PgMemoryStore},
    reasoning::ReasoningEngine,
    runner::AgentRunner,
    tools::{create_default_registry, LedgerApiClient},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OFFLINE_REPLY: &str =
    "The language model is not configured. Set GEMINI_API_KEY to enable answers.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env()?;

    info!("🚀 Ledger Agent - API Server");
    info!("📍 Port: {}", config.server.port);

    let (llm, embedder): (Arc<dyn LlmProvider>, Arc<dyn EmbeddingProvider>) =
        match &config.gemini_api_key {
            Some(key) => {
                let gemini = Arc::new(GeminiClient::new(key.clone(), config.embedding.dimensions));
                (gemini.clone() as Arc<dyn LlmProvider>, gemini as Arc<dyn EmbeddingProvider>)
            }
            None => {
                warn!("⚠️  GEMINI_API_KEY not set, running with offline model and embeddings");
                (
                    Arc::new(ScriptedLlm::answering(OFFLINE_REPLY)) as Arc<dyn LlmProvider>,
                    Arc::new(HashingEmbedder::new(config.embedding.dimensions))
                        as Arc<dyn EmbeddingProvider>,
                )
            }
        };

    let store: Arc<dyn MemoryStore> = match &config.database_url {
        Some(url) => {
            info!("🗄️  Using Postgres memory store");
            Arc::new(PgMemoryStore::connect_lazy(url)?)
        }
        None => {
            warn!("DATABASE_URL not set, memories are kept in process only");
            Arc::new(InMemoryMemoryStore::new())
        }
    };

    let ledger = match &config.ledger_api_base_url {
        Some(base_url) => Some(LedgerApiClient::new(base_url)?),
        None => {
            warn!("LEDGER_API_BASE_URL not set, ledger tools will report not configured");
            None
        }
    };

    let context: Arc<dyn FinancialContextProvider> = match &ledger {
        Some(api) => Arc::new(LedgerApiContextProvider::new(api.clone())),
        None => Arc::new(StaticContextProvider::empty()),
    };

    let embeddings = Arc::new(EmbeddingService::new(embedder, &config.embedding)?);
    let memory = Arc::new(MemoryManager::new(
        store,
        embeddings,
        llm.clone(),
        config.memory.clone(),
    ));

    let engine = Arc::new(ReasoningEngine::new(
        llm,
        Arc::new(create_default_registry(ledger)),
        config.reasoning.clone(),
    ));

    let runner = Arc::new(AgentRunner::new(memory, engine, context));

    info!("✅ Agent initialized");
    info!("📡 Starting API server...");

    start_server(runner, config.server.port).await?;

    Ok(())
}
