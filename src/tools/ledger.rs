//! HTTP-backed ledger tools
//!
//! Every tool calls the bookkeeping service at `LEDGER_API_BASE_URL`. Reads are
//! plain GETs; `create_invoice` and `record_expense` write and therefore need
//! the user's confirmation before the reasoning loop may run them.

use crate::error::AgentError;
use crate::tools::{Tool, ToolCategory, ToolRegistry};
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct LedgerApiClient {
    client: Client,
    base_url: String,
}

impl LedgerApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = %path, "Ledger API GET");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                AgentError::ToolExecution(format!("Ledger API request failed for {}: {}", path, e))
            })?;

        Self::read_body(path, response).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = %path, "Ledger API POST");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AgentError::ToolExecution(format!("Ledger API request failed for {}: {}", path, e))
            })?;

        Self::read_body(path, response).await
    }

    async fn read_body(path: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::ToolExecution(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::ToolExecution(format!(
                "Ledger API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOperation {
    SearchInvoices,
    GetInvoice,
    ListCustomers,
    ListExpenses,
    GetBalanceSummary,
    CreateInvoice,
    RecordExpense,
}

impl LedgerOperation {
    pub const ALL: [LedgerOperation; 7] = [
        LedgerOperation::SearchInvoices,
        LedgerOperation::GetInvoice,
        LedgerOperation::ListCustomers,
        LedgerOperation::ListExpenses,
        LedgerOperation::GetBalanceSummary,
        LedgerOperation::CreateInvoice,
        LedgerOperation::RecordExpense,
    ];

    fn writes(&self) -> bool {
        matches!(
            self,
            LedgerOperation::CreateInvoice | LedgerOperation::RecordExpense
        )
    }
}

pub struct LedgerTool {
    operation: LedgerOperation,
    api: Option<LedgerApiClient>,
}

impl LedgerTool {
    pub fn new(operation: LedgerOperation, api: Option<LedgerApiClient>) -> Self {
        Self { operation, api }
    }
}

#[async_trait::async_trait]
impl Tool for LedgerTool {
    fn name(&self) -> &'static str {
        match self.operation {
            LedgerOperation::SearchInvoices => "search_invoices",
            LedgerOperation::GetInvoice => "get_invoice",
            LedgerOperation::ListCustomers => "list_customers",
            LedgerOperation::ListExpenses => "list_expenses",
            LedgerOperation::GetBalanceSummary => "get_balance_summary",
            LedgerOperation::CreateInvoice => "create_invoice",
            LedgerOperation::RecordExpense => "record_expense",
        }
    }

    fn description(&self) -> &'static str {
        match self.operation {
            LedgerOperation::SearchInvoices => {
                "Search invoices by free text, customer name or status"
            }
            LedgerOperation::GetInvoice => "Fetch one invoice with its lines by invoice number",
            LedgerOperation::ListCustomers => "List customers, optionally filtered by name",
            LedgerOperation::ListExpenses => {
                "List expenses in a date range, optionally for one category"
            }
            LedgerOperation::GetBalanceSummary => {
                "Debit/credit totals and net balance for a period"
            }
            LedgerOperation::CreateInvoice => "Create a new invoice for a customer",
            LedgerOperation::RecordExpense => "Record a new expense",
        }
    }

    fn parameters(&self) -> Value {
        match self.operation {
            LedgerOperation::SearchInvoices => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free text search"},
                    "customer": {"type": "string"},
                    "status": {"type": "string", "enum": ["draft", "sent", "paid", "overdue"]},
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
            LedgerOperation::GetInvoice => json!({
                "type": "object",
                "properties": {
                    "number": {"type": "string", "description": "Invoice number, e.g. INV-1042"}
                },
                "required": ["number"]
            }),
            LedgerOperation::ListCustomers => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                }
            }),
            LedgerOperation::ListExpenses => json!({
                "type": "object",
                "properties": {
                    "from": {"type": "string", "description": "Start date, YYYY-MM-DD"},
                    "to": {"type": "string", "description": "End date, YYYY-MM-DD"},
                    "category": {"type": "string"}
                }
            }),
            LedgerOperation::GetBalanceSummary => json!({
                "type": "object",
                "properties": {
                    "period": {"type": "string", "description": "e.g. 2024-Q1, 2024-03, 2024"}
                }
            }),
            LedgerOperation::CreateInvoice => json!({
                "type": "object",
                "properties": {
                    "customer": {"type": "string"},
                    "due_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "lines": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "description": {"type": "string"},
                                "quantity": {"type": "number", "minimum": 0},
                                "unit_price": {"type": "number", "minimum": 0}
                            },
                            "required": ["description", "quantity", "unit_price"]
                        }
                    }
                },
                "required": ["customer", "lines"]
            }),
            LedgerOperation::RecordExpense => json!({
                "type": "object",
                "properties": {
                    "amount": {"type": "number", "minimum": 0},
                    "category": {"type": "string"},
                    "description": {"type": "string"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["amount", "category"]
            }),
        }
    }

    fn category(&self) -> ToolCategory {
        match self.operation {
            LedgerOperation::SearchInvoices
            | LedgerOperation::GetInvoice
            | LedgerOperation::CreateInvoice => ToolCategory::Invoices,
            LedgerOperation::ListCustomers => ToolCategory::Customers,
            LedgerOperation::ListExpenses | LedgerOperation::RecordExpense => {
                ToolCategory::Expenses
            }
            LedgerOperation::GetBalanceSummary => ToolCategory::Reports,
        }
    }

    fn has_side_effects(&self) -> bool {
        self.operation.writes()
    }

    fn requires_confirmation(&self) -> bool {
        self.operation.writes()
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        let api = self.api.as_ref().ok_or_else(|| {
            AgentError::ToolExecution("LEDGER_API_BASE_URL is not configured".to_string())
        })?;

        match self.operation {
            LedgerOperation::SearchInvoices => {
                api.get_json(
                    "/api/invoices",
                    &query_pairs(arguments, &["query", "customer", "status", "limit"]),
                )
                .await
            }
            LedgerOperation::GetInvoice => {
                let number = invoice_number(arguments)?;
                api.get_json(&format!("/api/invoices/{}", number), &[]).await
            }
            LedgerOperation::ListCustomers => {
                api.get_json("/api/customers", &query_pairs(arguments, &["query"]))
                    .await
            }
            LedgerOperation::ListExpenses => {
                api.get_json(
                    "/api/expenses",
                    &query_pairs(arguments, &["from", "to", "category"]),
                )
                .await
            }
            LedgerOperation::GetBalanceSummary => {
                api.get_json("/api/reports/balance", &query_pairs(arguments, &["period"]))
                    .await
            }
            LedgerOperation::CreateInvoice => api.post_json("/api/invoices", arguments).await,
            LedgerOperation::RecordExpense => api.post_json("/api/expenses", arguments).await,
        }
    }
}

/// Scalar arguments named in `keys`, rendered as query parameters
fn query_pairs(arguments: &Value, keys: &[&str]) -> Vec<(String, String)> {
    keys.iter()
        .filter_map(|key| {
            let value = match arguments.get(*key)? {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.to_string(), value))
        })
        .collect()
}

fn invoice_number(arguments: &Value) -> Result<String> {
    let number = arguments
        .get("number")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if number.is_empty()
        || !number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AgentError::InvalidToolInput(format!(
            "Invalid invoice number '{}'",
            number
        )));
    }

    Ok(number.to_uppercase())
}

/// Registry with every ledger tool wired to `api`.
///
/// Without an API the tools are still listed but fail when executed, so the
/// model learns the ledger is unreachable instead of guessing.
pub fn create_default_registry(api: Option<LedgerApiClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    for operation in LedgerOperation::ALL {
        registry.register(Arc::new(LedgerTool::new(operation, api.clone())));
    }

    registry
}
