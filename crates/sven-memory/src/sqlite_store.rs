// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::embedder::Embedder;
use crate::entry::MemoryEntry;
use crate::store::{cosine_similarity, MemoryStore};

fn open(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS memory_entries (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(id UNINDEXED, content)",
        [],
    )?;
    Ok(conn)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MemoryEntry> {
    let id: String = row.get(0)?;
    let agent_id: String = row.get(1)?;
    let content: String = row.get(2)?;
    let tags_json: String = row.get(3)?;
    let created_at_ms: i64 = row.get(4)?;
    Ok(MemoryEntry {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        agent_id,
        content,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: millis_to_datetime(created_at_ms),
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// `rusqlite` (bundled, FTS5 enabled) backed [`MemoryStore`].
///
/// Each call opens its own connection via `spawn_blocking` rather than
/// holding one across an `.await` point — `rusqlite::Connection` is not
/// `Send`-safe to park mid-await, and sqlite's own file locking already
/// serializes concurrent writers.
pub struct SqliteMemoryStore {
    db_path: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    /// In-memory vector overlay, keyed by entry id. Populated on save when
    /// an embedder is configured; evicted on delete. Not persisted — a
    /// fresh process re-embeds lazily on next save, or falls back to
    /// lexical search for entries it has not seen this run.
    vectors: Arc<Mutex<HashMap<Uuid, Vec<f32>>>>,
}

impl SqliteMemoryStore {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::with_embedder(path, None)
    }

    pub fn with_embedder(
        path: impl AsRef<Path>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> anyhow::Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        open(&db_path).context("initializing memory store schema")?;
        Ok(Self {
            db_path,
            embedder,
            vectors: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn save(&self, entry: MemoryEntry) -> anyhow::Result<()> {
        if let Some(embedder) = &self.embedder {
            let vector = embedder.embed(&entry.content);
            self.vectors.lock().await.insert(entry.id, vector);
        }

        let db_path = self.db_path.clone();
        let id = entry.id.to_string();
        let agent_id = entry.agent_id.clone();
        let content = entry.content.clone();
        let tags_json = serde_json::to_string(&entry.tags)?;
        let created_at_ms = entry.created_at.timestamp_millis();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = open(&db_path)?;
            conn.execute(
                "INSERT INTO memory_entries (id, agent_id, content, tags, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    agent_id = excluded.agent_id,
                    content = excluded.content,
                    tags = excluded.tags,
                    created_at = excluded.created_at",
                params![id, agent_id, content, tags_json, created_at_ms],
            )?;
            conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![id])?;
            conn.execute(
                "INSERT INTO memory_fts (id, content) VALUES (?1, ?2)",
                params![id, content],
            )?;
            Ok(())
        })
        .await
        .context("memory store save task panicked")??;
        Ok(())
    }

    async fn search(
        &self,
        agent_id: Option<&str>,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let db_path = self.db_path.clone();
        let agent_id = agent_id.map(str::to_string);
        let query = query.to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<MemoryEntry>> {
            let conn = open(&db_path)?;
            let mut ids = fts_match(&conn, &query, top_k * 4)
                .or_else(|_| like_fallback(&conn, &query, top_k * 4))?;
            ids.truncate(top_k * 4);

            let mut entries = Vec::with_capacity(ids.len());
            for id in ids.drain(..) {
                if let Some(entry) = load_entry(&conn, &id)? {
                    if agent_id.as_deref().is_none_or(|a| a == entry.agent_id) {
                        entries.push(entry);
                    }
                }
            }
            entries.truncate(top_k);
            Ok(entries)
        })
        .await
        .context("memory store search task panicked")?
    }

    async fn search_by_vector(
        &self,
        agent_id: Option<&str>,
        query: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let Some(embedder) = &self.embedder else {
            return self.search(agent_id, query, top_k).await;
        };
        let query_vec = embedder.embed(query);

        let vectors = self.vectors.lock().await.clone();
        if vectors.is_empty() {
            return self.search(agent_id, query, top_k).await;
        }

        let mut scored: Vec<(Uuid, f32)> = vectors
            .iter()
            .map(|(id, v)| (*id, cosine_similarity(&query_vec, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let db_path = self.db_path.clone();
        let agent_id = agent_id.map(str::to_string);
        let candidate_ids: Vec<Uuid> = scored.into_iter().map(|(id, _)| id).collect();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<MemoryEntry>> {
            let conn = open(&db_path)?;
            let mut entries = Vec::with_capacity(top_k);
            for id in candidate_ids {
                if entries.len() >= top_k {
                    break;
                }
                if let Some(entry) = load_entry(&conn, &id.to_string())? {
                    if agent_id.as_deref().is_none_or(|a| a == entry.agent_id) {
                        entries.push(entry);
                    }
                }
            }
            Ok(entries)
        })
        .await
        .context("memory store vector search task panicked")?
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MemoryEntry>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<MemoryEntry>> {
            let conn = open(&db_path)?;
            Ok(load_entry(&conn, &id.to_string())?)
        })
        .await
        .context("memory store get task panicked")?
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        self.vectors.lock().await.remove(&id);

        let db_path = self.db_path.clone();
        let id_str = id.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = open(&db_path)?;
            conn.execute("DELETE FROM memory_entries WHERE id = ?1", params![id_str])?;
            conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![id_str])?;
            Ok(())
        })
        .await
        .context("memory store delete task panicked")??;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        // No connection is held open across calls, so closing is just
        // dropping the in-memory overlay.
        self.vectors.lock().await.clear();
        Ok(())
    }
}

fn fts_match(conn: &Connection, query: &str, limit: usize) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM memory_fts WHERE memory_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![query, limit as i64], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn like_fallback(conn: &Connection, query: &str, limit: usize) -> rusqlite::Result<Vec<String>> {
    let pattern = format!("%{}%", query.replace('%', "").replace('_', ""));
    let mut stmt = conn.prepare(
        "SELECT id FROM memory_entries WHERE content LIKE ?1 ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![pattern, limit as i64], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn load_entry(conn: &Connection, id: &str) -> rusqlite::Result<Option<MemoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, agent_id, content, tags, created_at FROM memory_entries WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_entry(row)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (SqliteMemoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteMemoryStore::new(dir.path().join("memory.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let (store, _dir) = store();
        let entry = MemoryEntry::new("agent-1", "the sky is blue", vec!["fact".into()]);
        store.save(entry.clone()).await.unwrap();
        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "the sky is blue");
        assert_eq!(fetched.tags, vec!["fact".to_string()]);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (store, _dir) = store();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_finds_lexical_match() {
        let (store, _dir) = store();
        store
            .save(MemoryEntry::new("agent-1", "the quick brown fox", vec![]))
            .await
            .unwrap();
        store
            .save(MemoryEntry::new("agent-1", "totally unrelated", vec![]))
            .await
            .unwrap();
        let hits = store.search(None, "quick", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("quick"));
    }

    #[tokio::test]
    async fn search_scopes_to_agent_when_given() {
        let (store, _dir) = store();
        store
            .save(MemoryEntry::new("agent-1", "shared fact about rust", vec![]))
            .await
            .unwrap();
        store
            .save(MemoryEntry::new("agent-2", "shared fact about rust", vec![]))
            .await
            .unwrap();
        let hits = store.search(Some("agent-1"), "rust", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].agent_id, "agent-1");
    }

    #[tokio::test]
    async fn malformed_fts_query_falls_back_to_like() {
        let (store, _dir) = store();
        store
            .save(MemoryEntry::new("agent-1", "unbalanced \" quote test", vec![]))
            .await
            .unwrap();
        // A dangling double quote is invalid FTS5 MATCH syntax; the LIKE
        // fallback should still find the substring.
        let hits = store.search(None, "\"quote", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_row_and_is_idempotent() {
        let (store, _dir) = store();
        let entry = MemoryEntry::new("agent-1", "ephemeral", vec![]);
        store.save(entry.clone()).await.unwrap();
        store.delete(entry.id).await.unwrap();
        assert!(store.get(entry.id).await.unwrap().is_none());
        // Deleting again is a no-op, not an error.
        store.delete(entry.id).await.unwrap();
    }

    struct ConstantEmbedder(Vec<f32>);
    impl Embedder for ConstantEmbedder {
        fn embed(&self, _text: &str) -> Vec<f32> {
            self.0.clone()
        }
    }

    struct KeywordEmbedder;
    impl Embedder for KeywordEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            // Two-dimensional toy embedding: [contains "cat", contains "dog"].
            vec![
                if text.contains("cat") { 1.0 } else { 0.0 },
                if text.contains("dog") { 1.0 } else { 0.0 },
            ]
        }
    }

    #[tokio::test]
    async fn search_by_vector_ranks_by_cosine_similarity() {
        let dir = tempdir().unwrap();
        let store = SqliteMemoryStore::with_embedder(
            dir.path().join("memory.db"),
            Some(Arc::new(KeywordEmbedder)),
        )
        .unwrap();
        store
            .save(MemoryEntry::new("agent-1", "a story about a cat", vec![]))
            .await
            .unwrap();
        store
            .save(MemoryEntry::new("agent-1", "a story about a dog", vec![]))
            .await
            .unwrap();
        let hits = store.search_by_vector(None, "cat", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("cat"));
    }

    #[tokio::test]
    async fn search_by_vector_without_embedder_degrades_to_lexical() {
        let (store, _dir) = store();
        store
            .save(MemoryEntry::new("agent-1", "plain lexical entry", vec![]))
            .await
            .unwrap();
        let hits = store.search_by_vector(None, "lexical", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_evicts_cached_vector() {
        let dir = tempdir().unwrap();
        let store = SqliteMemoryStore::with_embedder(
            dir.path().join("memory.db"),
            Some(Arc::new(ConstantEmbedder(vec![1.0, 0.0]))),
        )
        .unwrap();
        let entry = MemoryEntry::new("agent-1", "vectorized", vec![]);
        store.save(entry.clone()).await.unwrap();
        assert!(store.vectors.lock().await.contains_key(&entry.id));
        store.delete(entry.id).await.unwrap();
        assert!(!store.vectors.lock().await.contains_key(&entry.id));
    }

    #[tokio::test]
    async fn close_clears_vector_overlay() {
        let dir = tempdir().unwrap();
        let store = SqliteMemoryStore::with_embedder(
            dir.path().join("memory.db"),
            Some(Arc::new(ConstantEmbedder(vec![1.0, 0.0]))),
        )
        .unwrap();
        store
            .save(MemoryEntry::new("agent-1", "entry", vec![]))
            .await
            .unwrap();
        store.close().await.unwrap();
        assert!(store.vectors.lock().await.is_empty());
    }
}
