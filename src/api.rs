//! REST API for the agent
//!
//! Exposes the runner and memory maintenance over HTTP. Each chat session
//! keeps its own conversation history and at most one tool call awaiting
//! confirmation, in process. The least recently active session is evicted
//! once `MAX_SESSIONS` is reached.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::ConversationHistory;
use crate::error::AgentError;
use crate::llm::ChatMessage;
use crate::models::PendingConfirmation;
use crate::reasoning::planner;
use crate::runner::{AgentRequest, AgentRunner, ReplyStatus};

/// Prior messages sent along with each chat request
const HISTORY_WINDOW: usize = 20;
const MAX_SESSIONS: usize = 1_000;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

/// Approves the call the session's last reply is waiting on
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub tool: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn failure(status: StatusCode, error: AgentError) -> ApiResult {
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

pub struct Session {
    pub history: ConversationHistory,
    pub pending: Option<PendingConfirmation>,
}

impl Session {
    fn new(session_id: Uuid) -> Self {
        Self {
            history: ConversationHistory::new(session_id),
            pending: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub runner: Arc<AgentRunner>,
    pub sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    max_sessions: usize,
}

impl ApiState {
    pub fn new(runner: Arc<AgentRunner>) -> Self {
        Self {
            runner,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions: MAX_SESSIONS,
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }
}

/// Get or create a session, evicting the least recently updated one when full.
fn session_entry(
    sessions: &mut HashMap<Uuid, Session>,
    session_id: Uuid,
    max_sessions: usize,
) -> &mut Session {
    if !sessions.contains_key(&session_id) && sessions.len() >= max_sessions {
        let oldest = sessions
            .iter()
            .min_by_key(|(_, s)| s.history.updated_at)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            info!(session_id = %id, "Evicting least recently used session");
            sessions.remove(&id);
        }
    }

    sessions
        .entry(session_id)
        .or_insert_with(|| Session::new(session_id))
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Client-chosen session ids need not be UUIDs; they map to a stable one.
fn session_uuid(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => Uuid::new_v4(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            AgentError::InvalidInput("message must not be empty".into()),
        );
    }

    let session_id = session_uuid(req.session_id.as_deref());
    let history = state
        .sessions
        .read()
        .await
        .get(&session_id)
        .map(|s| s.history.recent(HISTORY_WINDOW))
        .unwrap_or_default();

    info!(session_id = %session_id, history = history.len(), "Chat request");

    let reply = state
        .runner
        .respond(AgentRequest::new(message.clone()).with_history(history))
        .await;

    if reply.status != ReplyStatus::Failed {
        let mut sessions = state.sessions.write().await;
        let session = session_entry(&mut sessions, session_id, state.max_sessions);
        session.history.append(ChatMessage::user(message));
        session.history.append(ChatMessage::assistant(reply.answer.clone()));
        session.pending = reply
            .reasoning
            .as_ref()
            .and_then(|r| r.pending_confirmation.clone());
    }

    let status = match reply.status {
        ReplyStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };

    (
        status,
        Json(ApiResponse::success(serde_json::json!({
            "session_id": session_id.to_string(),
            "reply": reply,
        }))),
    )
}

/// =============================
/// Confirmation Endpoint
/// =============================

async fn confirm_handler(
    State(state): State<ApiState>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult {
    if req.session_id.trim().is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            AgentError::InvalidInput("session_id must not be empty".into()),
        );
    }
    let session_id = session_uuid(Some(&req.session_id));

    // Taken before running so a call is executed at most once
    let pending = {
        let mut sessions = state.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session)
                if session
                    .pending
                    .as_ref()
                    .map_or(false, |p| p.tool == req.tool) =>
            {
                session.pending.take()
            }
            _ => None,
        }
    };

    let Some(pending) = pending else {
        warn!(session_id = %session_id, tool = %req.tool, "Confirmation without a pending call");
        return failure(
            StatusCode::CONFLICT,
            AgentError::InvalidInput(format!(
                "no pending confirmation for {} in this session",
                req.tool
            )),
        );
    };

    info!(session_id = %session_id, tool = %pending.tool, "Confirmed tool call");
    let record = state.runner.confirm(&pending).await;

    if let Some(session) = state.sessions.write().await.get_mut(&session_id) {
        session.history.append(planner::tool_result_message(&record));
    }

    let status = if record.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(ApiResponse::success(record)))
}

/// =============================
/// Memory Endpoints
/// =============================

async fn memory_stats(State(state): State<ApiState>) -> ApiResult {
    match state.runner.memory().get_stats().await {
        Ok(stats) => (StatusCode::OK, Json(ApiResponse::success(stats))),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn consolidate_memories(State(state): State<ApiState>) -> ApiResult {
    match state.runner.memory().consolidate().await {
        Ok(merged) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "merged": merged }))),
        ),
        Err(e) => {
            warn!(error = %e, "Consolidation request failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn forget_memories(State(state): State<ApiState>) -> ApiResult {
    match state.runner.memory().forget().await {
        Ok(forgotten) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "forgotten": forgotten }))),
        ),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn preferences(State(state): State<ApiState>) -> ApiResult {
    match state.runner.memory().get_preferences().await {
        Ok(preferences) => (StatusCode::OK, Json(ApiResponse::success(preferences))),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(runner: Arc<AgentRunner>) -> Router {
    router(ApiState::new(runner))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/confirm", post(confirm_handler))
        .route("/api/memory/stats", get(memory_stats))
        .route("/api/memory/consolidate", post(consolidate_memories))
        .route("/api/memory/forget", post(forget_memories))
        .route("/api/preferences", get(preferences))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    runner: Arc<AgentRunner>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(runner);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, MemoryConfig, ReasoningConfig};
    use crate::context::StaticContextProvider;
    use crate::embedding::{EmbeddingService, HashingEmbedder};
    use crate::llm::mock::ScriptedLlm;
    use crate::llm::{LlmProvider, LlmResponse, ProposedToolCall};
    use crate::memory::{InMemoryMemoryStore, MemoryManager};
    use crate::reasoning::ReasoningEngine;
    use crate::tools::{Tool, ToolCategory, ToolRegistry};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct CreateInvoice;

    #[async_trait]
    impl Tool for CreateInvoice {
        fn name(&self) -> &'static str {
            "create_invoice"
        }

        fn description(&self) -> &'static str {
            "Create an invoice"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Invoices
        }

        fn has_side_effects(&self) -> bool {
            true
        }

        fn requires_confirmation(&self) -> bool {
            true
        }

        async fn execute(&self, _arguments: &Value) -> crate::Result<Value> {
            Ok(json!({"number": "INV-2001"}))
        }
    }

    fn test_router() -> Router {
        router(test_state(
            Arc::new(ScriptedLlm::answering("[]")),
            ToolRegistry::new(),
        ))
    }

    fn test_state(llm: Arc<dyn LlmProvider>, tools: ToolRegistry) -> ApiState {
        let embeddings = EmbeddingService::new(
            Arc::new(HashingEmbedder::new(32)),
            &EmbeddingConfig {
                dimensions: 32,
                ..Default::default()
            },
        )
        .unwrap();
        let memory = Arc::new(MemoryManager::new(
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(embeddings),
            llm.clone(),
            MemoryConfig::default(),
        ));
        let engine = Arc::new(ReasoningEngine::new(llm, Arc::new(tools), ReasoningConfig::default()));
        let runner = Arc::new(AgentRunner::new(
            memory,
            engine,
            Arc::new(StaticContextProvider::empty()),
        ));
        ApiState::new(runner)
    }

    /// Proposes `create_invoice` on every planning call.
    fn invoicing_state() -> ApiState {
        let llm = ScriptedLlm::new(|request, _| {
            let system = request
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if system.starts_with("You extract") {
                return Ok(LlmResponse::Answer("[]".to_string()));
            }
            Ok(LlmResponse::ToolCalls(vec![ProposedToolCall::new(
                "create_invoice",
                json!({"customer": "Acme Corp", "amount": 120}),
            )]))
        });
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CreateInvoice));
        test_state(Arc::new(llm), tools)
    }

    async fn chat(router: &Router, session: &str, message: &str) -> Value {
        let response = router
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({"session_id": session, "message": message}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_chat_returns_reply_and_session() {
        let response = test_router()
            .oneshot(post_json(
                "/api/chat",
                serde_json::json!({"session_id": "demo", "message": "Hello"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["reply"]["answer"], "[]");
        assert_eq!(body["data"]["reply"]["status"], "answered");
        assert_eq!(
            body["data"]["session_id"],
            stable_uuid_from_string("demo").to_string()
        );
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let response = test_router()
            .oneshot(post_json("/api/chat", serde_json::json!({"message": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn test_memory_endpoints() {
        let router = test_router();

        let stats = router
            .clone()
            .oneshot(Request::get("/api/memory/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(stats.status(), StatusCode::OK);
        assert_eq!(read_json(stats).await["data"]["count"], 0);

        let consolidated = router
            .clone()
            .oneshot(post_json("/api/memory/consolidate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(read_json(consolidated).await["data"]["merged"], 0);

        let forgotten = router
            .clone()
            .oneshot(post_json("/api/memory/forget", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(read_json(forgotten).await["data"]["forgotten"], 0);

        let preferences = router
            .oneshot(Request::get("/api/preferences").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(read_json(preferences).await["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_confirm_without_pending_call_is_rejected() {
        let state = invoicing_state();
        let router = router(state.clone());

        let response = router
            .oneshot(post_json(
                "/api/confirm",
                json!({"session_id": "demo", "tool": "create_invoice"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(read_json(response).await["success"], false);
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_runs_the_pending_call_once() {
        let state = invoicing_state();
        let router = router(state.clone());

        let body = chat(&router, "books", "Invoice Acme Corp 120").await;
        assert_eq!(body["data"]["reply"]["status"], "pending_confirmation");

        let confirm = |tool: &str| {
            router.clone().oneshot(post_json(
                "/api/confirm",
                json!({"session_id": "books", "tool": tool}),
            ))
        };

        let wrong_tool = confirm("delete_invoice").await.unwrap();
        assert_eq!(wrong_tool.status(), StatusCode::CONFLICT);

        let wrong_session = router
            .clone()
            .oneshot(post_json(
                "/api/confirm",
                json!({"session_id": "other", "tool": "create_invoice"}),
            ))
            .await
            .unwrap();
        assert_eq!(wrong_session.status(), StatusCode::CONFLICT);

        let approved = confirm("create_invoice").await.unwrap();
        assert_eq!(approved.status(), StatusCode::OK);
        let record = read_json(approved).await;
        assert_eq!(record["data"]["success"], true);
        assert_eq!(record["data"]["output"]["number"], "INV-2001");
        assert_eq!(record["data"]["input"]["customer"], "Acme Corp");

        let repeated = confirm("create_invoice").await.unwrap();
        assert_eq!(repeated.status(), StatusCode::CONFLICT);

        let sessions = state.sessions.read().await;
        let session = &sessions[&session_uuid(Some("books"))];
        assert!(session.pending.is_none());
        let last = session.history.messages().pop().unwrap();
        assert!(last.content.starts_with("[create_invoice]"));
        assert!(last.content.contains("INV-2001"));
    }

    #[tokio::test]
    async fn test_confirm_requires_session_id() {
        let response = test_router()
            .oneshot(post_json(
                "/api/confirm",
                json!({"session_id": " ", "tool": "create_invoice"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_least_recently_used_session_is_evicted() {
        let state = test_state(Arc::new(ScriptedLlm::answering("[]")), ToolRegistry::new())
            .with_max_sessions(2);
        let router = router(state.clone());

        chat(&router, "a", "first").await;
        chat(&router, "b", "second").await;
        chat(&router, "a", "again").await;
        chat(&router, "c", "third").await;

        let sessions = state.sessions.read().await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains_key(&session_uuid(Some("a"))));
        assert!(sessions.contains_key(&session_uuid(Some("c"))));
        assert!(!sessions.contains_key(&session_uuid(Some("b"))));
        assert_eq!(sessions[&session_uuid(Some("a"))].history.len(), 4);
    }

    #[tokio::test]
    async fn test_anonymous_chats_stay_within_the_cap() {
        let state = test_state(Arc::new(ScriptedLlm::answering("[]")), ToolRegistry::new())
            .with_max_sessions(3);
        let router = router(state.clone());

        for _ in 0..5 {
            let response = router
                .clone()
                .oneshot(post_json("/api/chat", json!({"message": "hello"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(state.sessions.read().await.len(), 3);
    }

    #[test]
    fn test_session_uuid_is_stable_for_names() {
        assert_eq!(session_uuid(Some("abc")), session_uuid(Some("abc")));
        let id = Uuid::new_v4();
        assert_eq!(session_uuid(Some(&id.to_string())), id);
    }
}
