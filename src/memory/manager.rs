//! Memory manager
//!
//! Semantic-memory half of the agent: embeds and stores knowledge, recalls it
//! by similarity, learns facts and preferences from conversations, and keeps
//! the store bounded through consolidation and forgetting.
//!
//! Mutating operations (`store`, `consolidate`, `forget`, preference writes)
//! are serialized through a single writer lock. `recall` only reads plus bumps
//! access counters, so concurrent recalls never wait on each other.

use crate::config::MemoryConfig;
use crate::embedding::EmbeddingService;
use crate::error::AgentError;
use crate::llm::{ChatMessage, LlmProvider, LlmResponse};
use crate::memory::extraction::{
    fact_extraction_request, parse_facts, parse_preferences, preference_extraction_request,
    summary_request,
};
use crate::memory::ranking::{
    concatenate_contents, consolidation_groups, find_reinforcement_target, is_forgettable,
    merge_metadata, rank, score_all,
};
use crate::memory::store::MemoryStore;
use crate::models::{Memory, MemoryStats, MemoryType, ScoredMemory, UserPreference};
use crate::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_IMPORTANCE: f32 = 0.5;
const REINFORCEMENT_BOOST: f32 = 0.1;
const DEFAULT_PREFERENCE_CONFIDENCE: f32 = 0.7;

/// Per-call recall overrides; unset fields use `MemoryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub limit: Option<usize>,
    pub min_similarity: Option<f32>,
    pub memory_type: Option<MemoryType>,
}

impl RecallOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn of_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }
}

pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    embeddings: Arc<EmbeddingService>,
    llm: Arc<dyn LlmProvider>,
    config: MemoryConfig,
    writer: Mutex<()>,
    /// Memories already examined by a consolidation pass
    settled: RwLock<HashSet<Uuid>>,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embeddings: Arc<EmbeddingService>,
        llm: Arc<dyn LlmProvider>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            llm,
            config,
            writer: Mutex::new(()),
            settled: RwLock::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Embed and persist `content`.
    ///
    /// A near-identical memory of the same type is reinforced instead of
    /// duplicated; the reinforced memory is returned in that case.
    pub async fn store(
        &self,
        content: &str,
        memory_type: MemoryType,
        importance: Option<f32>,
    ) -> Result<Memory> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AgentError::MemoryStore(
                "Cannot store an empty memory".to_string(),
            ));
        }

        let importance = importance.unwrap_or(DEFAULT_IMPORTANCE);
        let embedding = self.embeddings.embed(content).await?;

        let _guard = self.writer.lock().await;

        let existing = self.store.list().await?;
        if let Some(target) = find_reinforcement_target(
            &existing,
            &embedding,
            memory_type,
            self.config.reinforce_similarity,
        ) {
            let mut reinforced = target.clone();
            reinforced.set_importance(target.importance.max(importance) + REINFORCEMENT_BOOST);
            self.store
                .update_importance(reinforced.id, reinforced.importance)
                .await?;

            debug!(
                memory_id = %reinforced.id,
                importance = reinforced.importance,
                "Reinforced existing memory"
            );
            return Ok(reinforced);
        }

        let memory = Memory::new(content, memory_type, embedding, importance);
        self.store.insert(memory.clone()).await?;

        info!(
            memory_id = %memory.id,
            memory_type = %memory.memory_type,
            importance = memory.importance,
            "Stored memory"
        );

        Ok(memory)
    }

    /// Similarity-ranked recall. No match is an empty result, not an error.
    pub async fn recall(&self, query: &str, options: RecallOptions) -> Result<Vec<ScoredMemory>> {
        let limit = options.limit.unwrap_or(self.config.recall_limit);
        let min_similarity = options
            .min_similarity
            .unwrap_or(self.config.min_similarity);

        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let memories = self.store.list().await?;
        if memories.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embeddings.embed(query).await?;
        let mut ranked = rank(
            score_all(&query_embedding, memories, options.memory_type),
            min_similarity,
            limit,
        );

        if !ranked.is_empty() {
            let now = Utc::now();
            let ids: Vec<Uuid> = ranked.iter().map(|s| s.memory.id).collect();
            self.store.touch(&ids, now).await?;
            for scored in &mut ranked {
                scored.memory.touch(now);
            }
        }

        debug!(
            hits = ranked.len(),
            min_similarity = min_similarity,
            "Recalled memories"
        );

        Ok(ranked)
    }

    pub async fn get_preferences(&self) -> Result<Vec<UserPreference>> {
        self.store.preferences().await
    }

    /// Ask the model for durable facts in `messages` and store each one.
    ///
    /// Unparsable replies yield no facts. A fact that fails to store is
    /// logged and skipped.
    pub async fn extract_facts(&self, messages: &[ChatMessage]) -> Result<Vec<Memory>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let reply = self.llm.complete(fact_extraction_request(messages)).await?;
        let Some(text) = reply.into_text() else {
            warn!("Fact extraction returned tool calls, ignoring");
            return Ok(Vec::new());
        };

        let mut stored = Vec::new();
        for fact in parse_facts(&text) {
            let importance = fact.importance.unwrap_or(DEFAULT_IMPORTANCE);
            match self.store(&fact.fact, MemoryType::Fact, Some(importance)).await {
                Ok(memory) => stored.push(memory),
                Err(e) => warn!(error = %e, "Failed to store extracted fact"),
            }
        }

        info!(count = stored.len(), "Extracted facts");
        Ok(stored)
    }

    /// Ask the model for user preferences in `messages` and upsert them.
    pub async fn learn_preferences(&self, messages: &[ChatMessage]) -> Result<Vec<UserPreference>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let reply = self
            .llm
            .complete(preference_extraction_request(messages))
            .await?;
        let Some(text) = reply.into_text() else {
            warn!("Preference extraction returned tool calls, ignoring");
            return Ok(Vec::new());
        };

        let mut learned = Vec::new();
        for extracted in parse_preferences(&text) {
            let key = normalize_key(&extracted.key);
            let confidence = extracted
                .confidence
                .unwrap_or(DEFAULT_PREFERENCE_CONFIDENCE);

            match self
                .write_preference(&key, extracted.value.trim(), confidence, false)
                .await
            {
                Ok(preference) => learned.push(preference),
                Err(e) => warn!(error = %e, key = %key, "Failed to save preference"),
            }
        }

        info!(count = learned.len(), "Learned preferences");
        Ok(learned)
    }

    /// Overwrite a preference with exactly this confidence, bypassing the floor.
    pub async fn reevaluate_preference(
        &self,
        key: &str,
        value: &str,
        confidence: f32,
    ) -> Result<UserPreference> {
        self.write_preference(&normalize_key(key), value.trim(), confidence, true)
            .await
    }

    async fn write_preference(
        &self,
        key: &str,
        value: &str,
        confidence: f32,
        explicit: bool,
    ) -> Result<UserPreference> {
        let _guard = self.writer.lock().await;

        let floor = self.config.preference_confidence_floor;
        let confidence = if explicit {
            confidence
        } else {
            match self.store.preference(key).await? {
                Some(existing) if existing.confidence >= floor => confidence.max(floor),
                _ => confidence,
            }
        };

        let preference = UserPreference::new(key, value, confidence);
        self.store.upsert_preference(preference.clone()).await?;

        debug!(key = %key, confidence = preference.confidence, "Saved preference");
        Ok(preference)
    }

    /// Run `consolidate` only when the store has grown past the threshold.
    pub async fn consolidate_if_needed(&self) -> Result<usize> {
        let count = self.store.count().await?;
        if count <= self.config.consolidation_threshold {
            debug!(
                count = count,
                threshold = self.config.consolidation_threshold,
                "Consolidation not needed"
            );
            return Ok(0);
        }

        self.consolidate().await
    }

    /// Merge groups of near-duplicate memories.
    ///
    /// Returns how many original memories were replaced by merged ones. A
    /// second pass with no new memories in between merges nothing.
    pub async fn consolidate(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let memories = self.store.list().await?;
        let groups = {
            let settled = self.settled.read().await;
            consolidation_groups(
                &memories,
                &settled,
                self.config.consolidation_similarity,
                self.config.max_group_size,
            )
        };

        let mut removed = 0;
        let mut summaries = 0;
        let mut retry_later: HashSet<Uuid> = HashSet::new();

        for group in &groups {
            let members: Vec<&Memory> = group.iter().map(|&i| &memories[i]).collect();
            let Some(metadata) = merge_metadata(&members) else {
                continue;
            };

            let content = if summaries < self.config.max_summaries_per_run {
                summaries += 1;
                self.summarize(&members).await
            } else {
                concatenate_contents(&members)
            };

            let embedding = match self.embeddings.embed(&content).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!(error = %e, group_size = members.len(), "Skipping merge, embedding failed");
                    retry_later.extend(members.iter().map(|m| m.id));
                    continue;
                }
            };

            let merged = Memory {
                id: Uuid::new_v4(),
                content,
                embedding,
                memory_type: metadata.memory_type,
                importance: metadata.importance,
                created_at: metadata.created_at,
                last_accessed_at: metadata.last_accessed_at,
                access_count: metadata.access_count,
            };
            let merged_id = merged.id;

            self.store.insert(merged).await?;
            let ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
            removed += self.store.delete(&ids).await?;

            debug!(merged_id = %merged_id, sources = ids.len(), "Merged memories");
        }

        let live = self.store.list().await?;
        let mut settled = self.settled.write().await;
        settled.clear();
        settled.extend(
            live.iter()
                .map(|m| m.id)
                .filter(|id| !retry_later.contains(id)),
        );

        info!(
            groups = groups.len(),
            removed = removed,
            llm_summaries = summaries,
            "Consolidation complete"
        );

        Ok(removed)
    }

    async fn summarize(&self, members: &[&Memory]) -> String {
        let contents: Vec<&str> = members.iter().map(|m| m.content.as_str()).collect();

        match self.llm.complete(summary_request(&contents)).await {
            Ok(LlmResponse::Answer(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Summary reply was empty, concatenating instead");
                concatenate_contents(members)
            }
            Err(e) => {
                warn!(error = %e, "Summary failed, concatenating instead");
                concatenate_contents(members)
            }
        }
    }

    /// Delete memories that are both older than `max_age_days` and below
    /// `min_importance`.
    pub async fn forget(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let now = Utc::now();
        let stale: Vec<Uuid> = self
            .store
            .list()
            .await?
            .iter()
            .filter(|m| {
                is_forgettable(m, now, self.config.max_age_days, self.config.min_importance)
            })
            .map(|m| m.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self.store.delete(&stale).await?;
        info!(removed = removed, "Forgot stale memories");
        Ok(removed)
    }

    /// Render recalled memories for the system prompt, in the order given.
    pub fn format_for_context(memories: &[ScoredMemory]) -> String {
        if memories.is_empty() {
            return String::new();
        }

        let mut text = String::from("Relevant memories:\n");
        for (i, scored) in memories.iter().enumerate() {
            text.push_str(&format!(
                "{}. [{}] {} (relevance {:.2})\n",
                i + 1,
                scored.memory.memory_type,
                scored.memory.content,
                scored.score
            ));
        }
        text
    }

    pub async fn get_stats(&self) -> Result<MemoryStats> {
        let memories = self.store.list().await?;
        let preference_count = self.store.preferences().await?.len();

        let mut by_type = BTreeMap::new();
        for memory in &memories {
            *by_type.entry(memory.memory_type).or_insert(0) += 1;
        }

        let count = memories.len();
        let (avg_importance, avg_access_count) = if count == 0 {
            (0.0, 0.0)
        } else {
            (
                memories.iter().map(|m| m.importance).sum::<f32>() / count as f32,
                memories.iter().map(|m| m.access_count as f32).sum::<f32>() / count as f32,
            )
        };

        Ok(MemoryStats {
            count,
            by_type,
            avg_importance,
            avg_access_count,
            oldest: memories.iter().map(|m| m.created_at).min(),
            newest: memories.iter().map(|m| m.created_at).max(),
            preference_count,
            dimensions: self.embeddings.dimensions(),
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::llm::mock::ScriptedLlm;
    use crate::llm::EmbeddingProvider;
    use crate::memory::store::InMemoryMemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;

    /// Maps known texts to fixed vectors so similarity scores are exact.
    struct FixedEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| AgentError::Embedding(format!("no vector for '{}'", text)))
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn manager(
        vectors: &[(&str, [f32; 3])],
        llm: ScriptedLlm,
        config: MemoryConfig,
    ) -> (MemoryManager, Arc<InMemoryMemoryStore>) {
        let table = vectors
            .iter()
            .map(|(text, v)| (text.to_string(), v.to_vec()))
            .collect();
        let embeddings = EmbeddingService::new(
            Arc::new(FixedEmbedder { table }),
            &EmbeddingConfig {
                dimensions: 3,
                ..Default::default()
            },
        )
        .unwrap();
        let store = Arc::new(InMemoryMemoryStore::new());

        let manager = MemoryManager::new(
            store.clone(),
            Arc::new(embeddings),
            Arc::new(llm),
            config,
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_recall_on_empty_store_is_empty() {
        let (manager, _) = manager(&[], ScriptedLlm::answering("[]"), MemoryConfig::default());

        let hits = manager
            .recall("anything at all", RecallOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_recall_weekly_reports_preference() {
        let (manager, _) = manager(
            &[
                ("User prefers weekly reports", [1.0, 0.0, 0.0]),
                ("how often do you want reports", [0.8, 0.6, 0.0]),
            ],
            ScriptedLlm::answering("[]"),
            MemoryConfig::default(),
        );

        let stored = manager
            .store("User prefers weekly reports", MemoryType::Preference, None)
            .await
            .unwrap();
        assert_eq!(stored.importance, 0.5);

        let hits = manager
            .recall(
                "how often do you want reports",
                RecallOptions::default().with_min_similarity(0.5),
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, stored.id);
        assert!(hits[0].score >= 0.5);
    }

    #[tokio::test]
    async fn test_recall_threshold_order_and_access_tracking() {
        let (manager, store) = manager(
            &[
                ("invoice INV-1 is overdue", [1.0, 0.0, 0.0]),
                ("Acme pays late", [0.9, 0.435_889_9, 0.0]),
                ("office rent is 1200", [0.0, 0.0, 1.0]),
                ("late payments", [1.0, 0.0, 0.0]),
            ],
            ScriptedLlm::answering("[]"),
            MemoryConfig::default(),
        );

        let exact = manager
            .store("invoice INV-1 is overdue", MemoryType::Fact, None)
            .await
            .unwrap();
        manager
            .store("Acme pays late", MemoryType::Fact, None)
            .await
            .unwrap();
        manager
            .store("office rent is 1200", MemoryType::Fact, None)
            .await
            .unwrap();

        let hits = manager
            .recall("late payments", RecallOptions::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].memory.id, exact.id);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.score >= 0.7));
        assert_eq!(hits[0].memory.access_count, 1);

        manager
            .recall("late payments", RecallOptions::default().with_limit(1))
            .await
            .unwrap();
        let stored = store.get(exact.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
    }

    #[tokio::test]
    async fn test_store_reinforces_near_duplicate() {
        let (manager, store) = manager(
            &[
                ("Acme pays net 30", [1.0, 0.0, 0.0]),
                ("Acme pays on net 30 terms", [0.999, 0.044_710_2, 0.0]),
            ],
            ScriptedLlm::answering("[]"),
            MemoryConfig::default(),
        );

        let first = manager
            .store("Acme pays net 30", MemoryType::Fact, Some(0.6))
            .await
            .unwrap();
        let second = manager
            .store("Acme pays on net 30 terms", MemoryType::Fact, Some(0.4))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert!((second.importance - 0.7).abs() < 1e-6);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_empty_content_is_rejected() {
        let (manager, _) = manager(&[], ScriptedLlm::answering("[]"), MemoryConfig::default());

        let result = manager.store("   ", MemoryType::Fact, None).await;
        assert!(matches!(result, Err(AgentError::MemoryStore(_))));
    }

    #[tokio::test]
    async fn test_forget_requires_age_and_low_importance() {
        let (manager, store) = manager(&[], ScriptedLlm::answering("[]"), MemoryConfig::default());
        let old = Utc::now() - Duration::days(120);

        let mut old_unimportant = Memory::new("a", MemoryType::Fact, vec![1.0, 0.0, 0.0], 0.1);
        old_unimportant.created_at = old;
        let mut old_important = Memory::new("b", MemoryType::Fact, vec![0.0, 1.0, 0.0], 0.9);
        old_important.created_at = old;
        let young_unimportant = Memory::new("c", MemoryType::Fact, vec![0.0, 0.0, 1.0], 0.1);

        let doomed = old_unimportant.id;
        store.insert(old_unimportant).await.unwrap();
        store.insert(old_important).await.unwrap();
        store.insert(young_unimportant).await.unwrap();

        assert_eq!(manager.forget().await.unwrap(), 1);
        assert!(store.get(doomed).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(manager.forget().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consolidate_merges_similar_and_is_idempotent() {
        let config = MemoryConfig {
            consolidation_threshold: 1,
            ..Default::default()
        };
        let (manager, store) = manager(
            &[
                ("Acme is based in Lyon", [1.0, 0.0, 0.0]),
                ("Acme has its office in Lyon", [0.95, 0.312_249_9, 0.0]),
                ("Acme is headquartered in Lyon", [0.99, 0.141_067_4, 0.0]),
                ("rent is due monthly", [0.0, 0.0, 1.0]),
            ],
            ScriptedLlm::answering("Acme is headquartered in Lyon"),
            config,
        );

        let a = manager
            .store("Acme is based in Lyon", MemoryType::Fact, Some(0.4))
            .await
            .unwrap();
        let b = manager
            .store("Acme has its office in Lyon", MemoryType::Fact, Some(0.8))
            .await
            .unwrap();
        manager
            .store("rent is due monthly", MemoryType::Task, None)
            .await
            .unwrap();
        manager.recall("Acme is based in Lyon", RecallOptions::default()).await.unwrap();

        let before = store.count().await.unwrap();
        let merged = manager.consolidate_if_needed().await.unwrap();
        assert!(merged >= 1);
        assert!(store.count().await.unwrap() < before);

        let survivors = store.list().await.unwrap();
        assert!(survivors.iter().all(|m| m.id != a.id && m.id != b.id));
        let summary = survivors
            .iter()
            .find(|m| m.content == "Acme is headquartered in Lyon")
            .unwrap();
        assert_eq!(summary.importance, 0.8);
        assert!(summary.access_count >= 1);

        assert_eq!(manager.consolidate().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consolidate_concatenates_past_summary_budget() {
        let config = MemoryConfig {
            max_summaries_per_run: 0,
            ..Default::default()
        };
        let (manager, store) = manager(
            &[
                ("Acme is based in Lyon", [1.0, 0.0, 0.0]),
                ("Acme has its office in Lyon", [0.95, 0.312_249_9, 0.0]),
                (
                    "Acme is based in Lyon; Acme has its office in Lyon",
                    [0.99, 0.141_067_4, 0.0],
                ),
                (
                    "Acme has its office in Lyon; Acme is based in Lyon",
                    [0.99, 0.141_067_4, 0.0],
                ),
            ],
            ScriptedLlm::answering("unused"),
            config,
        );
        manager
            .store("Acme is based in Lyon", MemoryType::Fact, None)
            .await
            .unwrap();
        manager
            .store("Acme has its office in Lyon", MemoryType::Fact, None)
            .await
            .unwrap();

        assert_eq!(manager.consolidate().await.unwrap(), 2);

        let survivors = store.list().await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert!(survivors[0].content.contains("Acme is based in Lyon"));
        assert!(survivors[0].content.contains("Acme has its office in Lyon"));
    }

    #[tokio::test]
    async fn test_consolidate_below_threshold_does_nothing() {
        let (manager, _) = manager(&[], ScriptedLlm::answering("[]"), MemoryConfig::default());
        assert_eq!(manager.consolidate_if_needed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extract_facts_stores_fact_memories() {
        let llm = ScriptedLlm::answering(
            r#"```json
[{"fact": "Acme pays net 30", "importance": 0.8},
 {"fact": "Office rent is 1200 EUR"}]
```"#,
        );
        let (manager, store) = manager(
            &[
                ("Acme pays net 30", [1.0, 0.0, 0.0]),
                ("Office rent is 1200 EUR", [0.0, 1.0, 0.0]),
            ],
            llm,
            MemoryConfig::default(),
        );

        let facts = manager
            .extract_facts(&[ChatMessage::user("Acme pays net 30, rent is 1200 EUR")])
            .await
            .unwrap();

        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|m| m.memory_type == MemoryType::Fact));
        assert_eq!(facts[0].importance, 0.8);
        assert_eq!(facts[1].importance, DEFAULT_IMPORTANCE);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_extract_facts_malformed_output_is_empty() {
        let (manager, store) = manager(
            &[],
            ScriptedLlm::answering("Sorry, nothing to extract."),
            MemoryConfig::default(),
        );

        let facts = manager
            .extract_facts(&[ChatMessage::user("hello")])
            .await
            .unwrap();
        assert!(facts.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extract_facts_propagates_llm_failure() {
        let llm = ScriptedLlm::new(|_, _| Err(AgentError::Llm("unreachable".to_string())));
        let (manager, _) = manager(&[], llm, MemoryConfig::default());

        let result = manager.extract_facts(&[ChatMessage::user("hello")]).await;
        assert!(matches!(result, Err(AgentError::Llm(_))));
    }

    #[tokio::test]
    async fn test_learn_preferences_respects_confidence_floor() {
        let llm = ScriptedLlm::new(|_, index| {
            let reply = if index == 0 {
                r#"[{"key": "Report Frequency", "value": "weekly", "confidence": 0.8}]"#
            } else {
                r#"[{"key": "report_frequency", "value": "monthly", "confidence": 0.2}]"#
            };
            Ok(LlmResponse::Answer(reply.to_string()))
        });
        let (manager, _) = manager(&[], llm, MemoryConfig::default());
        let turn = [ChatMessage::user("Send reports weekly")];

        let first = manager.learn_preferences(&turn).await.unwrap();
        assert_eq!(first[0].key, "report_frequency");

        manager.learn_preferences(&turn).await.unwrap();
        let prefs = manager.get_preferences().await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].value, "monthly");
        assert_eq!(prefs[0].confidence, 0.5);

        let reevaluated = manager
            .reevaluate_preference("report_frequency", "monthly", 0.2)
            .await
            .unwrap();
        assert_eq!(reevaluated.confidence, 0.2);
    }

    #[tokio::test]
    async fn test_format_for_context_preserves_order() {
        let second = ScoredMemory {
            memory: Memory::new("second", MemoryType::Task, vec![1.0], 0.5),
            score: 0.75,
        };
        let first = ScoredMemory {
            memory: Memory::new("first", MemoryType::Fact, vec![1.0], 0.5),
            score: 0.95,
        };

        let text = MemoryManager::format_for_context(&[second, first]);
        let second_at = text.find("second").unwrap();
        let first_at = text.find("first").unwrap();
        assert!(second_at < first_at);
        assert!(text.contains("1. [task] second (relevance 0.75)"));

        assert_eq!(MemoryManager::format_for_context(&[]), "");
    }

    #[tokio::test]
    async fn test_stats() {
        let (manager, _) = manager(
            &[
                ("Acme pays net 30", [1.0, 0.0, 0.0]),
                ("Call Acme on Monday", [0.0, 1.0, 0.0]),
            ],
            ScriptedLlm::answering("[]"),
            MemoryConfig::default(),
        );
        manager
            .store("Acme pays net 30", MemoryType::Fact, Some(0.4))
            .await
            .unwrap();
        manager
            .store("Call Acme on Monday", MemoryType::Task, Some(0.8))
            .await
            .unwrap();

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.by_type.get(&MemoryType::Fact), Some(&1));
        assert!((stats.avg_importance - 0.6).abs() < 1e-6);
        assert_eq!(stats.dimensions, 3);
        assert!(stats.oldest <= stats.newest);
    }
}
