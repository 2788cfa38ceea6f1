//! Fact & preference extraction prompts
//!
//! The model is asked for a bare JSON array. Replies are parsed leniently:
//! markdown fences and surrounding prose are ignored, items that do not fit
//! the expected shape are dropped, and anything unparsable yields nothing.

use crate::conversation::format_transcript;
use crate::llm::{ChatMessage, CompletionRequest};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const SUMMARY_TEMPERATURE: f32 = 0.2;

const FACT_PROMPT: &str = r#"You extract durable facts from a conversation between a user and their bookkeeping assistant.

Keep only information worth remembering across sessions: business details, customers, suppliers, payment terms, recurring obligations, decisions the user made.
Skip greetings, questions, and anything only relevant to this one exchange.

Respond with ONLY a JSON array, no prose:
[{"fact": "<one self-contained sentence>", "importance": <0.0-1.0>}]
Respond with [] if there is nothing worth remembering."#;

const PREFERENCE_PROMPT: &str = r#"You extract user preferences from a conversation between a user and their bookkeeping assistant.

A preference is how the user wants things done: report frequency, currency, language, level of detail, invoice defaults, communication style.
Use short snake_case keys. Reuse an obvious key if the user restates a preference.

Respond with ONLY a JSON array, no prose:
[{"key": "<snake_case_key>", "value": "<value>", "confidence": <0.0-1.0>}]
Respond with [] if the user expressed no preferences."#;

const SUMMARY_PROMPT: &str = r#"Merge the following related memories into ONE concise statement that keeps every distinct detail (names, amounts, dates) and drops repetition.
Respond with the statement only."#;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedFact {
    pub fact: String,
    #[serde(default)]
    pub importance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedPreference {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

pub fn fact_extraction_request(messages: &[ChatMessage]) -> CompletionRequest {
    CompletionRequest::new(
        vec![
            ChatMessage::system(FACT_PROMPT),
            ChatMessage::user(format!("CONVERSATION:\n---\n{}---", format_transcript(messages))),
        ],
        EXTRACTION_TEMPERATURE,
    )
}

pub fn preference_extraction_request(messages: &[ChatMessage]) -> CompletionRequest {
    CompletionRequest::new(
        vec![
            ChatMessage::system(PREFERENCE_PROMPT),
            ChatMessage::user(format!("CONVERSATION:\n---\n{}---", format_transcript(messages))),
        ],
        EXTRACTION_TEMPERATURE,
    )
}

pub fn summary_request(contents: &[&str]) -> CompletionRequest {
    let listed = contents
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n");

    CompletionRequest::new(
        vec![
            ChatMessage::system(SUMMARY_PROMPT),
            ChatMessage::user(listed),
        ],
        SUMMARY_TEMPERATURE,
    )
}

pub fn parse_facts(text: &str) -> Vec<ExtractedFact> {
    parse_items::<ExtractedFact>(text)
        .into_iter()
        .filter(|f| !f.fact.trim().is_empty())
        .collect()
}

pub fn parse_preferences(text: &str) -> Vec<ExtractedPreference> {
    parse_items::<ExtractedPreference>(text)
        .into_iter()
        .filter(|p| !p.key.trim().is_empty() && !p.value.trim().is_empty())
        .collect()
}

fn parse_items<T: for<'de> Deserialize<'de>>(text: &str) -> Vec<T> {
    let Some(array) = extract_json_array(text) else {
        debug!("Extraction reply contained no JSON array");
        return Vec::new();
    };

    array
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Strip ```json fences, then take the outermost `[...]` span.
fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&cleaned[start..=end]).ok()? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_facts_plain_and_fenced() {
        let plain = r#"[{"fact": "Acme pays net 30", "importance": 0.8}]"#;
        let fenced = "```json\n[{\"fact\": \"Acme pays net 30\"}]\n```";

        let facts = parse_facts(plain);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].importance, Some(0.8));

        let facts = parse_facts(fenced);
        assert_eq!(facts[0].fact, "Acme pays net 30");
        assert_eq!(facts[0].importance, None);
    }

    #[test]
    fn test_parse_facts_with_surrounding_prose() {
        let text = "Here is what I found:\n[{\"fact\": \"Rent is 1200 EUR\", \"importance\": 0.6}]\nHope that helps.";
        assert_eq!(parse_facts(text).len(), 1);
    }

    #[test]
    fn test_malformed_output_yields_nothing() {
        assert!(parse_facts("I could not find any facts.").is_empty());
        assert!(parse_facts("[{\"fact\": ").is_empty());
        assert!(parse_facts("{\"fact\": \"not an array\"}").is_empty());
        assert!(parse_preferences("").is_empty());
    }

    #[test]
    fn test_mismatched_items_are_dropped() {
        let text = r#"[{"key": "currency", "value": "EUR", "confidence": 0.9},
                        {"key": "missing_value"},
                        "just a string",
                        {"key": "", "value": "x"}]"#;

        let prefs = parse_preferences(text);
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].key, "currency");
    }

    #[test]
    fn test_requests_carry_transcript() {
        let messages = vec![ChatMessage::user("Send me reports every Monday")];
        let request = preference_extraction_request(&messages);

        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1]
            .content
            .contains("User: Send me reports every Monday"));
        assert!(request.tools.is_empty());
    }
}
