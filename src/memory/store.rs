//! Memory persistence layer
//!
//! The store only keeps records; scoring, filtering and decay policy live
//! in the manager. In-memory by default; `PgMemoryStore` for durability.

use crate::error::AgentError;
use crate::models::{Memory, UserPreference};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for memory persistence
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new memory. Fails if its vector length differs from the
    /// vectors already stored.
    async fn insert(&self, memory: Memory) -> Result<()>;
    async fn list(&self) -> Result<Vec<Memory>>;
    async fn get(&self, id: Uuid) -> Result<Option<Memory>>;
    /// Count a recall hit for each id
    async fn touch(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;
    async fn update_importance(&self, id: Uuid, importance: f32) -> Result<()>;
    /// Returns the number of memories actually removed
    async fn delete(&self, ids: &[Uuid]) -> Result<usize>;
    async fn count(&self) -> Result<usize>;

    async fn preferences(&self) -> Result<Vec<UserPreference>>;
    async fn preference(&self, key: &str) -> Result<Option<UserPreference>>;
    async fn upsert_preference(&self, preference: UserPreference) -> Result<()>;
}

/// In-memory store for development and tests
pub struct InMemoryMemoryStore {
    memories: RwLock<HashMap<Uuid, Memory>>,
    preferences: RwLock<HashMap<String, UserPreference>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn insert(&self, memory: Memory) -> Result<()> {
        let mut memories = self.memories.write().await;

        if let Some(existing) = memories.values().next() {
            if existing.embedding.len() != memory.embedding.len() {
                return Err(AgentError::MemoryStore(format!(
                    "Embedding length {} does not match store dimension {}",
                    memory.embedding.len(),
                    existing.embedding.len()
                )));
            }
        }

        if memories.contains_key(&memory.id) {
            return Err(AgentError::MemoryStore(format!(
                "Memory {} already exists",
                memory.id
            )));
        }

        memories.insert(memory.id, memory);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Memory>> {
        let memories = self.memories.read().await;
        Ok(memories.values().cloned().collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Memory>> {
        let memories = self.memories.read().await;
        Ok(memories.get(&id).cloned())
    }

    async fn touch(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let mut memories = self.memories.write().await;
        for id in ids {
            if let Some(memory) = memories.get_mut(id) {
                memory.touch(at);
            }
        }
        Ok(())
    }

    async fn update_importance(&self, id: Uuid, importance: f32) -> Result<()> {
        let mut memories = self.memories.write().await;
        match memories.get_mut(&id) {
            Some(memory) => {
                memory.set_importance(importance);
                Ok(())
            }
            None => Err(AgentError::MemoryStore(format!("Memory {} not found", id))),
        }
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        let mut memories = self.memories.write().await;
        Ok(ids.iter().filter(|id| memories.remove(id).is_some()).count())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.memories.read().await.len())
    }

    async fn preferences(&self) -> Result<Vec<UserPreference>> {
        let preferences = self.preferences.read().await;
        let mut all: Vec<UserPreference> = preferences.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn preference(&self, key: &str) -> Result<Option<UserPreference>> {
        Ok(self.preferences.read().await.get(key).cloned())
    }

    async fn upsert_preference(&self, preference: UserPreference) -> Result<()> {
        let mut preferences = self.preferences.write().await;
        preferences.insert(preference.key.clone(), preference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryType;

    #[tokio::test]
    async fn test_insert_list_delete() {
        let store = InMemoryMemoryStore::new();
        let a = Memory::new("a", MemoryType::Fact, vec![1.0, 0.0], 0.5);
        let b = Memory::new("b", MemoryType::Task, vec![0.0, 1.0], 0.5);
        let (a_id, b_id) = (a.id, b.id);

        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let removed = store.delete(&[a_id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(a_id).await.unwrap().is_none());
        assert!(store.get(b_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_dimension() {
        let store = InMemoryMemoryStore::new();
        store
            .insert(Memory::new("a", MemoryType::Fact, vec![1.0, 0.0], 0.5))
            .await
            .unwrap();

        let result = store
            .insert(Memory::new("b", MemoryType::Fact, vec![1.0, 0.0, 0.0], 0.5))
            .await;
        assert!(matches!(result, Err(AgentError::MemoryStore(_))));
    }

    #[tokio::test]
    async fn test_touch_and_importance() {
        let store = InMemoryMemoryStore::new();
        let memory = Memory::new("a", MemoryType::Fact, vec![1.0], 0.5);
        let id = memory.id;
        store.insert(memory).await.unwrap();

        let now = Utc::now();
        store.touch(&[id, id], now).await.unwrap();
        store.update_importance(id, 4.0).await.unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 2);
        assert_eq!(stored.last_accessed_at, now);
        assert_eq!(stored.importance, 1.0);
    }

    #[tokio::test]
    async fn test_preferences_single_value_per_key() {
        let store = InMemoryMemoryStore::new();
        store
            .upsert_preference(UserPreference::new("report_frequency", "monthly", 0.6))
            .await
            .unwrap();
        store
            .upsert_preference(UserPreference::new("report_frequency", "weekly", 0.8))
            .await
            .unwrap();
        store
            .upsert_preference(UserPreference::new("currency", "EUR", 0.9))
            .await
            .unwrap();

        let all = store.preferences().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "currency");
        assert_eq!(all[1].value, "weekly");
    }
}
