//! Agent Memory System
//!
//! Semantic memory: similarity-ranked recall, fact and preference learning,
//! consolidation of near-duplicates and age/importance-gated forgetting.

pub mod extraction;
pub mod manager;
pub mod postgres;
pub mod ranking;
pub mod store;

pub use manager::{MemoryManager, RecallOptions, DEFAULT_IMPORTANCE};
pub use postgres::PgMemoryStore;
pub use store::{InMemoryMemoryStore, MemoryStore};
