//! Pure scoring, grouping and decay rules over memory snapshots.
//!
//! Nothing here touches storage or the network, so the manager can run these
//! against a `list()` snapshot and then apply the outcome in one write.

use crate::embedding::cosine_similarity;
use crate::models::{Memory, MemoryType, ScoredMemory};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

/// Score every memory against the query vector, optionally restricted to one type.
pub fn score_all(
    query: &[f32],
    memories: Vec<Memory>,
    memory_type: Option<MemoryType>,
) -> Vec<ScoredMemory> {
    memories
        .into_iter()
        .filter(|m| memory_type.map_or(true, |t| m.memory_type == t))
        .map(|memory| {
            let score = cosine_similarity(query, &memory.embedding);
            ScoredMemory { memory, score }
        })
        .collect()
}

/// Recall ordering: score desc, then importance desc, then most recently used.
pub fn compare_scored(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.memory
                .importance
                .partial_cmp(&a.memory.importance)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.memory.last_accessed_at.cmp(&a.memory.last_accessed_at))
}

/// Drop everything under `min_similarity`, sort, keep the top `limit`.
pub fn rank(mut scored: Vec<ScoredMemory>, min_similarity: f32, limit: usize) -> Vec<ScoredMemory> {
    scored.retain(|s| s.score.is_finite() && s.score >= min_similarity);
    scored.sort_by(compare_scored);
    scored.truncate(limit);
    scored
}

/// Best same-type match at or above `threshold`, used to reinforce instead of
/// inserting a near-duplicate.
pub fn find_reinforcement_target<'a>(
    memories: &'a [Memory],
    embedding: &[f32],
    memory_type: MemoryType,
    threshold: f32,
) -> Option<&'a Memory> {
    memories
        .iter()
        .filter(|m| m.memory_type == memory_type)
        .map(|m| (m, cosine_similarity(embedding, &m.embedding)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(m, _)| m)
}

/// Partition memories into merge groups.
///
/// Seeds are taken oldest first from the memories not in `settled`. A
/// candidate joins a group only if it has the seed's type and is at or above
/// `threshold` with every member already in the group. Groups are capped at
/// `max_group_size`; single-member groups are not returned. The returned
/// values are indices into `memories`.
pub fn consolidation_groups(
    memories: &[Memory],
    settled: &HashSet<Uuid>,
    threshold: f32,
    max_group_size: usize,
) -> Vec<Vec<usize>> {
    let max_group_size = max_group_size.max(2);

    let mut order: Vec<usize> = (0..memories.len()).collect();
    order.sort_by(|&a, &b| {
        memories[a]
            .created_at
            .cmp(&memories[b].created_at)
            .then_with(|| memories[a].id.cmp(&memories[b].id))
    });

    let mut assigned = vec![false; memories.len()];
    let mut groups = Vec::new();

    for &seed in &order {
        if assigned[seed] || settled.contains(&memories[seed].id) {
            continue;
        }

        let mut group = vec![seed];
        for &candidate in &order {
            if group.len() >= max_group_size {
                break;
            }
            if candidate == seed
                || assigned[candidate]
                || memories[candidate].memory_type != memories[seed].memory_type
            {
                continue;
            }

            let fits = group.iter().all(|&member| {
                cosine_similarity(&memories[member].embedding, &memories[candidate].embedding)
                    >= threshold
            });
            if fits {
                group.push(candidate);
            }
        }

        if group.len() > 1 {
            for &member in &group {
                assigned[member] = true;
            }
            groups.push(group);
        }
    }

    groups
}

/// Combined metadata for a merged memory
#[derive(Debug, Clone, PartialEq)]
pub struct MergedMetadata {
    pub memory_type: MemoryType,
    pub importance: f32,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// `None` for an empty group.
pub fn merge_metadata(group: &[&Memory]) -> Option<MergedMetadata> {
    let first = group.first()?;

    Some(MergedMetadata {
        memory_type: first.memory_type,
        importance: group.iter().map(|m| m.importance).fold(0.0, f32::max),
        access_count: group
            .iter()
            .fold(0u64, |acc, m| acc.saturating_add(m.access_count)),
        created_at: group.iter().map(|m| m.created_at).min()?,
        last_accessed_at: group.iter().map(|m| m.last_accessed_at).max()?,
    })
}

/// Fallback merge text when no summary is produced
pub fn concatenate_contents(group: &[&Memory]) -> String {
    let mut seen = HashSet::new();
    group
        .iter()
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Old and unimportant. Either condition alone keeps the memory.
pub fn is_forgettable(
    memory: &Memory,
    now: DateTime<Utc>,
    max_age_days: i64,
    min_importance: f32,
) -> bool {
    let too_old = now.signed_duration_since(memory.created_at) > Duration::days(max_age_days);
    let unimportant = memory.importance < min_importance;
    too_old && unimportant
}
