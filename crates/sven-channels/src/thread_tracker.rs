// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sven_store::{Store, ThreadSession};

/// Pluggable lookup used for restart recovery: a miss in memory falls
/// through to this store before concluding the thread is not tracked.
#[async_trait]
pub trait ThreadTrackerStore: Send + Sync {
    async fn is_tracked(&self, key: &str) -> bool;
    async fn mark_tracked(&self, key: &str, session_key: &str);
}

#[async_trait]
impl ThreadTrackerStore for Store {
    async fn is_tracked(&self, key: &str) -> bool {
        matches!(self.get_thread_session(key).await, Ok(Some(_)))
    }

    async fn mark_tracked(&self, key: &str, session_key: &str) {
        let now = Utc::now();
        let ts = ThreadSession {
            thread_id: key.to_string(),
            session_key: session_key.to_string(),
            created_at: now,
            last_used: now,
        };
        if let Err(e) = self.save_thread_session(ts).await {
            tracing::warn!(error = %e, "failed to persist thread tracking state");
        }
    }
}

/// A `(channel, thread)` → tracked set with an injectable persistent
/// backing store for restart recovery (spec §4.9 "Thread tracking").
pub struct ThreadTracker {
    active: Mutex<HashSet<String>>,
    store: Option<Arc<dyn ThreadTrackerStore>>,
}

impl ThreadTracker {
    pub fn new(store: Option<Arc<dyn ThreadTrackerStore>>) -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            store,
        }
    }

    /// Consults the in-memory set first and, on miss, the persistent store,
    /// promoting hits to memory.
    pub async fn is_active(&self, channel: &str, thread: &str) -> bool {
        let key = thread_key(channel, thread);
        if self.active.lock().unwrap().contains(&key) {
            return true;
        }
        if let Some(store) = &self.store {
            if store.is_tracked(&key).await {
                self.active.lock().unwrap().insert(key);
                return true;
            }
        }
        false
    }

    pub async fn mark_active(&self, channel: &str, thread: &str, session_key: &str) {
        let key = thread_key(channel, thread);
        self.active.lock().unwrap().insert(key.clone());
        if let Some(store) = &self.store {
            store.mark_tracked(&key, session_key).await;
        }
    }
}

fn thread_key(channel: &str, thread: &str) -> String {
    format!("{channel}:{thread}")
}
