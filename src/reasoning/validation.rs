//! Deterministic validation of gathered data and draft answers
//!
//! Rules run after every act stage, independent of the model. A failed rule
//! sends the loop back to planning with the issues attached.

use crate::models::ToolCallRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

const AMOUNT_TOLERANCE: f64 = 0.01;

static INVOICE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bINV-[0-9A-Z]+(?:-[0-9A-Z]+)*\b").expect("valid regex"));
static QUOTED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“]([^"“”\n]{2,80})["”]"#).expect("valid regex"));

/// What a rule gets to look at
pub struct ValidationInput<'a> {
    /// The model's proposed answer, if it produced one this iteration
    pub draft_answer: Option<&'a str>,
    /// Tool calls made in this iteration
    pub step_calls: &'a [ToolCallRecord],
    /// Every tool call made so far, this iteration included
    pub gathered_calls: &'a [ToolCallRecord],
    pub financial_context: &'a str,
}

impl ValidationInput<'_> {
    fn evidence(&self) -> String {
        let mut text = self.financial_context.to_lowercase();
        for call in self.gathered_calls.iter().filter(|c| c.success) {
            text.push('\n');
            text.push_str(&call.output.to_string().to_lowercase());
        }
        text
    }
}

pub struct RuleOutcome {
    pub passed: bool,
    pub details: String,
}

impl RuleOutcome {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

/// Trait for validation rules
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, input: &ValidationInput<'_>) -> RuleOutcome;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub rule: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
    pub issues: Vec<String>,
}

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Accounting rules: balanced entries and referenced entities
    pub fn with_default_rules() -> Self {
        let mut validator = Self::new();
        validator.add_rule(Box::new(BalancedEntriesRule));
        validator.add_rule(Box::new(ReferencedEntitiesRule));
        validator
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> ValidationReport {
        let mut checks = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();

        for rule in &self.rules {
            let outcome = rule.validate(input);
            if !outcome.passed {
                issues.push(format!("{}: {}", rule.name(), outcome.details));
            }
            checks.push(ValidationCheck {
                rule: rule.name().to_string(),
                passed: outcome.passed,
                details: outcome.details,
            });
        }

        let passed = issues.is_empty();
        debug!(rule_count = self.rules.len(), passed = passed, "Validation completed");

        ValidationReport {
            passed,
            checks,
            issues,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

//
// ========== Rules ==========
//

/// Debits must equal credits, and a declared `total` must equal the sum of
/// its `lines`, anywhere in the tool outputs of the current iteration.
pub struct BalancedEntriesRule;

impl ValidationRule for BalancedEntriesRule {
    fn name(&self) -> &'static str {
        "balanced_entries"
    }

    fn validate(&self, input: &ValidationInput<'_>) -> RuleOutcome {
        let mut problems = Vec::new();
        let mut inspected = 0;

        for call in input.step_calls.iter().filter(|c| c.success) {
            inspect_amounts(&call.tool, &call.output, &mut inspected, &mut problems);
        }

        if problems.is_empty() {
            RuleOutcome::pass(format!("{} totals consistent", inspected))
        } else {
            RuleOutcome::fail(problems.join("; "))
        }
    }
}

fn inspect_amounts(tool: &str, value: &Value, inspected: &mut usize, problems: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            let debits = first_number(value, &["total_debits", "debits", "debit_total"]);
            let credits = first_number(value, &["total_credits", "credits", "credit_total"]);
            if let (Some(debits), Some(credits)) = (debits, credits) {
                *inspected += 1;
                if (debits - credits).abs() > AMOUNT_TOLERANCE {
                    problems.push(format!(
                        "{} reports debits {:.2} but credits {:.2}",
                        tool, debits, credits
                    ));
                }
            }

            if let (Some(total), Some(Value::Array(lines))) =
                (first_number(value, &["total"]), map.get("lines"))
            {
                let amounts: Option<Vec<f64>> = lines.iter().map(line_amount).collect();
                if let Some(amounts) = amounts.filter(|a| !a.is_empty()) {
                    *inspected += 1;
                    let sum: f64 = amounts.iter().sum();
                    if (sum - total).abs() > AMOUNT_TOLERANCE {
                        let label = map
                            .get("number")
                            .and_then(Value::as_str)
                            .unwrap_or("document");
                        problems.push(format!(
                            "{} total {:.2} does not match line sum {:.2}",
                            label, total, sum
                        ));
                    }
                }
            }

            for child in map.values() {
                inspect_amounts(tool, child, inspected, problems);
            }
        }
        Value::Array(items) => {
            for item in items {
                inspect_amounts(tool, item, inspected, problems);
            }
        }
        _ => {}
    }
}

fn first_number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_f64))
}

fn line_amount(line: &Value) -> Option<f64> {
    first_number(line, &["amount"]).or_else(|| {
        let quantity = first_number(line, &["quantity"])?;
        let unit_price = first_number(line, &["unit_price"])?;
        Some(quantity * unit_price)
    })
}

/// Invoice numbers and quoted customer names in the draft answer must appear
/// in the gathered tool outputs or the financial context.
pub struct ReferencedEntitiesRule;

impl ReferencedEntitiesRule {
    pub fn references(answer: &str) -> Vec<String> {
        let mut references: Vec<String> = INVOICE_NUMBER
            .find_iter(answer)
            .map(|m| m.as_str().to_uppercase())
            .collect();
        references.extend(
            QUOTED_NAME
                .captures_iter(answer)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|name| !name.is_empty()),
        );
        references.sort();
        references.dedup();
        references
    }
}

impl ValidationRule for ReferencedEntitiesRule {
    fn name(&self) -> &'static str {
        "referenced_entities"
    }

    fn validate(&self, input: &ValidationInput<'_>) -> RuleOutcome {
        let Some(answer) = input.draft_answer else {
            return RuleOutcome::pass("no draft answer to check");
        };

        let references = Self::references(answer);
        if references.is_empty() {
            return RuleOutcome::pass("no entity references");
        }

        let evidence = input.evidence();
        let known_invoices: HashSet<String> = INVOICE_NUMBER
            .find_iter(&evidence)
            .map(|m| m.as_str().to_uppercase())
            .collect();

        let missing: Vec<&String> = references
            .iter()
            .filter(|r| {
                if is_invoice_number(r) {
                    !known_invoices.contains(r.as_str())
                } else {
                    !contains_phrase(&evidence, &r.to_lowercase())
                }
            })
            .collect();

        if missing.is_empty() {
            RuleOutcome::pass(format!("{} references found in tool data", references.len()))
        } else {
            RuleOutcome::fail(format!(
                "not found in gathered data: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }
}

fn is_invoice_number(reference: &str) -> bool {
    INVOICE_NUMBER
        .find(reference)
        .map_or(false, |m| m.start() == 0 && m.end() == reference.len())
}

/// `needle` occurs in `haystack` with no letter or digit directly on either side.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}
