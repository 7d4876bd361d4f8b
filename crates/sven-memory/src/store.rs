// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use uuid::Uuid;

use crate::entry::MemoryEntry;

/// Persists and retrieves [`MemoryEntry`] rows.
///
/// `agent_id` scoping (own/shared/none) is a policy decision made by the
/// caller — this trait only filters on the value it is given. Passing
/// `None` searches across every agent's entries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(&self, entry: MemoryEntry) -> anyhow::Result<()>;

    /// Lexical search ranked by relevance, most relevant first.
    async fn search(
        &self,
        agent_id: Option<&str>,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    /// Vector search ranked by cosine similarity. Degrades to [`MemoryStore::search`]
    /// when no embedder is configured.
    async fn search_by_vector(
        &self,
        agent_id: Option<&str>,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MemoryEntry>>;

    /// Removes the entry and evicts any cached vector for it.
    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for a
/// zero-length vector or dimension mismatch rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
