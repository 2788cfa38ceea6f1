//! Gemini API client
//!
//! Implements both chat completion (with function calling) and embeddings.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AgentError;
use crate::llm::{
    ChatMessage, ChatRole, CompletionRequest, EmbeddingProvider, LlmProvider, LlmResponse,
    ProposedToolCall,
};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dimensions: usize,
}

impl GeminiClient {
    pub fn new(api_key: String, dimensions: usize) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    fn ensure_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AgentError::Llm("GEMINI_API_KEY not configured".to_string()));
        }
        Ok(())
    }

    async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::Llm(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response ({}): {}", status, error_text);
            return Err(AgentError::Llm(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse> {
        self.ensure_key()?;

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.chat_model, self.api_key
        );
        let body = build_generate_request(&request);

        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            temperature = request.temperature,
            "Calling Gemini generateContent"
        );

        let response: GenerateResponse = self
            .post(&url, &body)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Gemini parse error: {}", e)))?;

        parse_generate_response(response)
    }

    fn name(&self) -> &str {
        &self.chat_model
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_key().map_err(|e| AgentError::Embedding(e.to_string()))?;

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.embedding_model, self.api_key
        );
        let body = EmbedRequest {
            content: RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: text.to_string(),
                }],
            },
            output_dimensionality: self.dimensions,
        };

        let response: EmbedResponse = self
            .post(&url, &body)
            .await
            .map_err(|e| AgentError::Embedding(e.to_string()))?
            .json()
            .await
            .map_err(|e| AgentError::Embedding(format!("Invalid embedding response: {}", e)))?;

        Ok(response.embedding.values)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}

/// Gemini has no tool role and wants alternating turns: system messages go
/// to `systemInstruction`, tool output is replayed as user text, and
/// consecutive same-role messages are merged into one turn.
fn build_generate_request(request: &CompletionRequest) -> GenerateRequest {
    let mut system_parts = Vec::new();
    let mut contents: Vec<RequestContent> = Vec::new();

    for message in &request.messages {
        let (role, text) = match message.role {
            ChatRole::System => {
                system_parts.push(RequestPart {
                    text: message.content.clone(),
                });
                continue;
            }
            ChatRole::User => ("user", message.content.clone()),
            ChatRole::Assistant => ("model", message.content.clone()),
            ChatRole::Tool => ("user", format!("Tool result:\n{}", message.content)),
        };

        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => {
                last.parts.push(RequestPart { text });
            }
            _ => contents.push(RequestContent {
                role: Some(role.to_string()),
                parts: vec![RequestPart { text }],
            }),
        }
    }

    if contents.is_empty() {
        contents.push(RequestContent {
            role: Some("user".to_string()),
            parts: vec![RequestPart {
                text: "Continue.".to_string(),
            }],
        });
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(vec![ToolDeclarations {
            function_declarations: request
                .tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
        }])
    };

    GenerateRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(RequestContent {
                role: None,
                parts: system_parts,
            })
        },
        tools,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

fn parse_generate_response(response: GenerateResponse) -> Result<LlmResponse> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Llm("No response from Gemini API".to_string()))?;

    let mut text = String::new();
    let mut calls = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(call) = part.function_call {
            calls.push(ProposedToolCall::new(
                call.name,
                call.args.unwrap_or_else(|| serde_json::json!({})),
            ));
        } else if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    if !calls.is_empty() {
        info!(calls = calls.len(), "Gemini proposed tool calls");
        return Ok(LlmResponse::ToolCalls(calls));
    }

    if text.trim().is_empty() {
        return Err(AgentError::Llm(format!(
            "Empty response from Gemini (finish reason: {})",
            candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(LlmResponse::Answer(text))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    content: RequestContent,
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolSchema;

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest::new(
            vec![
                ChatMessage::system("You are a bookkeeping assistant"),
                ChatMessage::user("How much does ACME owe?"),
                ChatMessage::tool("{\"balance\": 1200}"),
                ChatMessage::assistant("ACME owes 1200."),
            ],
            0.1,
        )
        .with_tools(vec![ToolSchema {
            name: "search_invoices".to_string(),
            description: "Search invoices".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }]);

        let body = build_generate_request(&request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "You are a bookkeeping assistant"
        );
        // user question and tool output merge into a single user turn
        assert_eq!(json["contents"].as_array().unwrap().len(), 2);
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(
            json["tools"][0]["functionDeclarations"][0]["name"],
            "search_invoices"
        );
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "get_invoice", "args": {"number": "INV-7"}}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let response: GenerateResponse = serde_json::from_value(raw).unwrap();
        let parsed = parse_generate_response(response).unwrap();
        assert_eq!(
            parsed,
            LlmResponse::ToolCalls(vec![ProposedToolCall::new(
                "get_invoice",
                serde_json::json!({"number": "INV-7"})
            )])
        );
    }

    #[test]
    fn test_parse_text_and_empty_responses() {
        let raw = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "All invoices are paid."}]}}]
        });
        let response: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parse_generate_response(response).unwrap(),
            LlmResponse::Answer("All invoices are paid.".to_string())
        );

        let empty: GenerateResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(matches!(parse_generate_response(empty), Err(AgentError::Llm(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(String::new(), 8);
        let result = client
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")], 0.2))
            .await;
        assert!(result.unwrap_err().to_string().to_lowercase().contains("api_key"));

        let embed = client.embed("hi").await;
        assert!(matches!(embed, Err(AgentError::Embedding(_))));
    }
}
