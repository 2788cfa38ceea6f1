//! Financial context providers
//!
//! A provider returns an opaque text snapshot of ledger state that is
//! injected into the system prompt. The agent never parses it.

use crate::tools::LedgerApiClient;
use crate::Result;
use serde_json::Value;

#[async_trait::async_trait]
pub trait FinancialContextProvider: Send + Sync {
    async fn get_context(&self) -> Result<String>;
}

/// Fixed snapshot, for demos and tests
pub struct StaticContextProvider {
    snapshot: String,
}

impl StaticContextProvider {
    pub fn new(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(String::new())
    }
}

#[async_trait::async_trait]
impl FinancialContextProvider for StaticContextProvider {
    async fn get_context(&self) -> Result<String> {
        Ok(self.snapshot.clone())
    }
}

/// Snapshot fetched from the ledger service's `/api/context` endpoint.
///
/// The endpoint may answer with `{"summary": "..."}` or any other JSON,
/// which is passed through pretty-printed.
pub struct LedgerApiContextProvider {
    api: LedgerApiClient,
}

impl LedgerApiContextProvider {
    pub fn new(api: LedgerApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl FinancialContextProvider for LedgerApiContextProvider {
    async fn get_context(&self) -> Result<String> {
        let body = self.api.get_json("/api/context", &[]).await?;
        Ok(render_snapshot(&body))
    }
}

fn render_snapshot(body: &Value) -> String {
    match body.get("summary").and_then(Value::as_str) {
        Some(summary) => summary.trim().to_string(),
        None => match body {
            Value::String(s) => s.trim().to_string(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticContextProvider::new("Cash: 12,400 EUR");
        assert_eq!(provider.get_context().await.unwrap(), "Cash: 12,400 EUR");
        assert_eq!(StaticContextProvider::empty().get_context().await.unwrap(), "");
    }

    #[test]
    fn test_render_snapshot() {
        assert_eq!(
            render_snapshot(&json!({"summary": " 3 open invoices "})),
            "3 open invoices"
        );
        assert!(render_snapshot(&json!({"open_invoices": 3})).contains("\"open_invoices\": 3"));
    }
}
