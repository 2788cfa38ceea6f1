//! Postgres-backed memory store
//!
//! Schema is created lazily on first use. Vectors are stored as `REAL[]`.

use crate::error::AgentError;
use crate::memory::store::MemoryStore;
use crate::models::{Memory, MemoryType, UserPreference};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PgMemoryStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgMemoryStore {
    /// Build a lazily-connecting pool; no connection is made until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| db_error("Failed to configure postgres pool", e))?;

        info!("Memory store backend: postgres");

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    /// Use an existing pool, e.g. one shared with other services.
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_memories (
                      id UUID PRIMARY KEY,
                      content TEXT NOT NULL,
                      embedding REAL[] NOT NULL,
                      memory_type TEXT NOT NULL,
                      importance REAL NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      last_accessed_at TIMESTAMPTZ NOT NULL,
                      access_count BIGINT NOT NULL DEFAULT 0
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_preferences (
                      key TEXT PRIMARY KEY,
                      value TEXT NOT NULL,
                      confidence REAL NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_error("Failed to initialize memory schema", e))?;

        Ok(())
    }

    fn memory_from_row(row: &PgRow) -> Result<Memory> {
        let memory_type: String = row
            .try_get("memory_type")
            .map_err(|e| db_error("Invalid memory_type column", e))?;
        let access_count: i64 = row
            .try_get("access_count")
            .map_err(|e| db_error("Invalid access_count column", e))?;

        Ok(Memory {
            id: row
                .try_get("id")
                .map_err(|e| db_error("Invalid id column", e))?,
            content: row
                .try_get("content")
                .map_err(|e| db_error("Invalid content column", e))?,
            embedding: row
                .try_get::<Vec<f32>, _>("embedding")
                .map_err(|e| db_error("Invalid embedding column", e))?,
            memory_type: MemoryType::parse(&memory_type).unwrap_or_else(|| {
                warn!(memory_type = %memory_type, "Unknown memory type, treating as fact");
                MemoryType::Fact
            }),
            importance: row
                .try_get("importance")
                .map_err(|e| db_error("Invalid importance column", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| db_error("Invalid created_at column", e))?,
            last_accessed_at: row
                .try_get("last_accessed_at")
                .map_err(|e| db_error("Invalid last_accessed_at column", e))?,
            access_count: access_count.max(0) as u64,
        })
    }

    fn preference_from_row(row: &PgRow) -> Result<UserPreference> {
        Ok(UserPreference {
            key: row
                .try_get("key")
                .map_err(|e| db_error("Invalid key column", e))?,
            value: row
                .try_get("value")
                .map_err(|e| db_error("Invalid value column", e))?,
            confidence: row
                .try_get("confidence")
                .map_err(|e| db_error("Invalid confidence column", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| db_error("Invalid updated_at column", e))?,
        })
    }
}

fn db_error(context: &str, error: sqlx::Error) -> AgentError {
    AgentError::MemoryStore(format!("{}: {}", context, error))
}

const MEMORY_COLUMNS: &str =
    "id, content, embedding, memory_type, importance, created_at, last_accessed_at, access_count";

#[async_trait::async_trait]
impl MemoryStore for PgMemoryStore {
    async fn insert(&self, memory: Memory) -> Result<()> {
        self.ensure_schema().await?;

        let existing_dims: Option<i32> =
            sqlx::query_scalar("SELECT cardinality(embedding) FROM agent_memories LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to read store dimension", e))?;

        if let Some(dims) = existing_dims {
            if dims as usize != memory.embedding.len() {
                return Err(AgentError::MemoryStore(format!(
                    "Embedding length {} does not match store dimension {}",
                    memory.embedding.len(),
                    dims
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO agent_memories
              (id, content, embedding, memory_type, importance, created_at, last_accessed_at, access_count)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(memory.id)
        .bind(&memory.content)
        .bind(&memory.embedding)
        .bind(memory.memory_type.as_str())
        .bind(memory.importance)
        .bind(memory.created_at)
        .bind(memory.last_accessed_at)
        .bind(memory.access_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert memory", e))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Memory>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!("SELECT {} FROM agent_memories", MEMORY_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load memories", e))?;

        rows.iter().map(Self::memory_from_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Memory>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM agent_memories WHERE id = $1",
            MEMORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load memory", e))?;

        row.as_ref().map(Self::memory_from_row).transpose()
    }

    async fn touch(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.ensure_schema().await?;

        sqlx::query(
            "UPDATE agent_memories SET access_count = access_count + 1, last_accessed_at = $2 WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record memory access", e))?;

        Ok(())
    }

    async fn update_importance(&self, id: Uuid, importance: f32) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("UPDATE agent_memories SET importance = $2 WHERE id = $1")
            .bind(id)
            .bind(importance.clamp(0.0, 1.0))
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update importance", e))?;

        if result.rows_affected() == 0 {
            return Err(AgentError::MemoryStore(format!("Memory {} not found", id)));
        }
        Ok(())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM agent_memories WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete memories", e))?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        self.ensure_schema().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agent_memories")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count memories", e))?;

        Ok(count.max(0) as usize)
    }

    async fn preferences(&self) -> Result<Vec<UserPreference>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT key, value, confidence, updated_at FROM agent_preferences ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load preferences", e))?;

        rows.iter().map(Self::preference_from_row).collect()
    }

    async fn preference(&self, key: &str) -> Result<Option<UserPreference>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT key, value, confidence, updated_at FROM agent_preferences WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load preference", e))?;

        row.as_ref().map(Self::preference_from_row).transpose()
    }

    async fn upsert_preference(&self, preference: UserPreference) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_preferences (key, value, confidence, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
              SET value = EXCLUDED.value,
                  confidence = EXCLUDED.confidence,
                  updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&preference.key)
        .bind(&preference.value)
        .bind(preference.confidence)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save preference", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgConnectOptions;
    use std::str::FromStr;

    /// Runs against `TEST_DATABASE_URL` inside a throwaway schema; skipped when unset.
    async fn scratch_pool() -> Option<(PgPool, PgPool, String)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let admin = PgPoolOptions::new().max_connections(1).connect(&url).await.ok()?;

        let schema = format!("agent_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .ok()?;

        let options = PgConnectOptions::from_str(&url)
            .ok()?
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .ok()?;
        Some((admin, pool, schema))
    }

    #[tokio::test]
    async fn test_undecodable_column_is_an_error() {
        let Some((admin, pool, schema)) = scratch_pool().await else {
            return;
        };

        // Wrong column type: REAL is expected
        sqlx::query(
            "CREATE TABLE agent_preferences (key TEXT PRIMARY KEY, value TEXT NOT NULL, \
             confidence DOUBLE PRECISION NOT NULL, updated_at TIMESTAMPTZ NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO agent_preferences VALUES ('currency', 'EUR', 0.9, now())")
            .execute(&pool)
            .await
            .unwrap();

        let store = PgMemoryStore::with_pool(pool);
        let result = store.preferences().await;

        sqlx::query(&format!("DROP SCHEMA {} CASCADE", schema))
            .execute(&admin)
            .await
            .unwrap();

        match result {
            Err(AgentError::MemoryStore(message)) => assert!(message.contains("confidence")),
            other => panic!("expected a memory store error, got {:?}", other),
        }
    }
}
