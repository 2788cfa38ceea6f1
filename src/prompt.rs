//! System prompt assembly
//!
//! Sections appear in a fixed order: role, preferences, memories, financial
//! context. Empty sections are left out.

use crate::memory::MemoryManager;
use crate::models::{ScoredMemory, UserPreference};

const ROLE: &str = "You are a bookkeeping assistant for a small business. \
You answer questions about invoices, customers, expenses and balances using the ledger tools available to you. \
Never invent figures: if the data is not in a tool result or the financial context, say so.";

pub struct PromptContext<'a> {
    pub memories: &'a [ScoredMemory],
    pub preferences: &'a [UserPreference],
    pub financial_context: &'a str,
}

pub fn build_system_prompt(context: &PromptContext<'_>) -> String {
    let mut sections = vec![ROLE.to_string()];

    if !context.preferences.is_empty() {
        let mut text = String::from("User preferences:\n");
        for preference in context.preferences {
            text.push_str(&format!("- {}: {}\n", preference.key, preference.value));
        }
        sections.push(text.trim_end().to_string());
    }

    let memories = MemoryManager::format_for_context(context.memories);
    if !memories.is_empty() {
        sections.push(memories.trim_end().to_string());
    }

    let financial = context.financial_context.trim();
    if !financial.is_empty() {
        sections.push(format!("Current financial context:\n{}", financial));
    }

    sections.join("\n\n")
}
