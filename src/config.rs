//! Runtime configuration
//!
//! Read once at process start from the environment (after `dotenv`),
//! then passed by value into the components that need it.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Memory recall, consolidation and decay settings
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub recall_limit: usize,
    pub min_similarity: f32,
    /// Live memory count above which consolidation runs
    pub consolidation_threshold: usize,
    /// Pairwise similarity required to group memories for merging
    pub consolidation_similarity: f32,
    pub max_group_size: usize,
    /// Upper bound on LLM summarisation calls per consolidation pass
    pub max_summaries_per_run: usize,
    /// Similarity at which `store()` reinforces instead of inserting
    pub reinforce_similarity: f32,
    pub max_age_days: i64,
    pub min_importance: f32,
    pub preference_confidence_floor: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: 10,
            min_similarity: 0.7,
            consolidation_threshold: 100,
            consolidation_similarity: 0.92,
            max_group_size: 5,
            max_summaries_per_run: 10,
            reinforce_similarity: 0.98,
            max_age_days: 90,
            min_importance: 0.3,
            preference_confidence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    /// Zero disables memoization
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 1536,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1024,
        }
    }
}

/// Bounds for the plan/act/validate loop
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub max_iterations: u32,
    pub step_timeout: Duration,
    pub planning_temperature: f32,
    pub answer_temperature: f32,
    pub retry_backoff: Duration,
    pub max_tool_calls_per_step: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            step_timeout: Duration::from_millis(30_000),
            planning_temperature: 0.1,
            answer_temperature: 0.7,
            retry_backoff: Duration::from_millis(500),
            max_tool_calls_per_step: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub memory: MemoryConfig,
    pub embedding: EmbeddingConfig,
    pub reasoning: ReasoningConfig,
    pub server: ServerConfig,
    pub gemini_api_key: Option<String>,
    pub database_url: Option<String>,
    pub ledger_api_base_url: Option<String>,
}

impl AgentConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (environment, tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = AgentConfig::default();

        let memory = MemoryConfig {
            recall_limit: parse_or(&lookup, "AGENT_RECALL_LIMIT", d.memory.recall_limit)?,
            min_similarity: parse_or(&lookup, "AGENT_MIN_SIMILARITY", d.memory.min_similarity)?,
            consolidation_threshold: parse_or(
                &lookup,
                "AGENT_CONSOLIDATION_THRESHOLD",
                d.memory.consolidation_threshold,
            )?,
            consolidation_similarity: parse_or(
                &lookup,
                "AGENT_CONSOLIDATION_SIMILARITY",
                d.memory.consolidation_similarity,
            )?,
            max_group_size: parse_or(
                &lookup,
                "AGENT_CONSOLIDATION_MAX_GROUP",
                d.memory.max_group_size,
            )?
            .max(2),
            max_summaries_per_run: parse_or(
                &lookup,
                "AGENT_CONSOLIDATION_MAX_LLM_CALLS",
                d.memory.max_summaries_per_run,
            )?,
            reinforce_similarity: parse_or(
                &lookup,
                "AGENT_REINFORCE_SIMILARITY",
                d.memory.reinforce_similarity,
            )?,
            max_age_days: parse_or(&lookup, "AGENT_MAX_AGE_DAYS", d.memory.max_age_days)?,
            min_importance: parse_or(&lookup, "AGENT_MIN_IMPORTANCE", d.memory.min_importance)?,
            preference_confidence_floor: parse_or(
                &lookup,
                "AGENT_PREFERENCE_CONFIDENCE_FLOOR",
                d.memory.preference_confidence_floor,
            )?,
        };

        let cache_ttl_secs: u64 = parse_or(
            &lookup,
            "AGENT_EMBEDDING_CACHE_TTL_SECS",
            d.embedding.cache_ttl.as_secs(),
        )?;

        let embedding = EmbeddingConfig {
            dimensions: parse_or(&lookup, "AGENT_EMBEDDING_DIMENSIONS", d.embedding.dimensions)?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_max_entries: d.embedding.cache_max_entries,
        };

        if embedding.dimensions == 0 {
            return Err(AgentError::Config(
                "AGENT_EMBEDDING_DIMENSIONS must be greater than zero".to_string(),
            ));
        }

        let step_timeout_ms: u64 = parse_or(
            &lookup,
            "AGENT_STEP_TIMEOUT_MS",
            d.reasoning.step_timeout.as_millis() as u64,
        )?;
        let retry_backoff_ms: u64 = parse_or(
            &lookup,
            "AGENT_LLM_RETRY_BACKOFF_MS",
            d.reasoning.retry_backoff.as_millis() as u64,
        )?;

        let reasoning = ReasoningConfig {
            max_iterations: parse_or(&lookup, "AGENT_MAX_ITERATIONS", d.reasoning.max_iterations)?,
            step_timeout: Duration::from_millis(step_timeout_ms),
            planning_temperature: parse_or(
                &lookup,
                "AGENT_PLANNING_TEMPERATURE",
                d.reasoning.planning_temperature,
            )?,
            answer_temperature: parse_or(
                &lookup,
                "AGENT_ANSWER_TEMPERATURE",
                d.reasoning.answer_temperature,
            )?,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            max_tool_calls_per_step: d.reasoning.max_tool_calls_per_step,
        };

        let port_raw = lookup("PORT").or_else(|| lookup("API_PORT"));
        let port = match port_raw {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AgentError::Config(format!("PORT must be a valid port number, got '{}'", raw))
            })?,
            None => d.server.port,
        };

        Ok(Self {
            memory,
            embedding,
            reasoning,
            server: ServerConfig { port },
            gemini_api_key: non_empty(lookup("GEMINI_API_KEY")),
            database_url: non_empty(lookup("DATABASE_URL").or_else(|| lookup("POSTGRES_URL"))),
            ledger_api_base_url: non_empty(lookup("LEDGER_API_BASE_URL")),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|_| {
            AgentError::Config(format!("{} has an invalid value: '{}'", key, raw))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.memory.recall_limit, 10);
        assert!((config.memory.min_similarity - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.memory.consolidation_threshold, 100);
        assert_eq!(config.memory.max_age_days, 90);
        assert!((config.memory.min_importance - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.reasoning.max_iterations, 10);
        assert_eq!(config.reasoning.step_timeout, Duration::from_millis(30_000));
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("AGENT_MAX_ITERATIONS", "3"),
            ("AGENT_MIN_SIMILARITY", "0.55"),
            ("GEMINI_API_KEY", "abc"),
            ("API_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(config.reasoning.max_iterations, 3);
        assert!((config.memory.min_similarity - 0.55).abs() < 1e-6);
        assert_eq!(config.gemini_api_key.as_deref(), Some("abc"));
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let result = AgentConfig::from_lookup(lookup_from(&[("AGENT_RECALL_LIMIT", "lots")]));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_blank_api_key_treated_as_unset() {
        let config = AgentConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(config.gemini_api_key.is_none());
    }
}
