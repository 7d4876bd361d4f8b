// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A uniform envelope of external stimulus.
///
/// Events are value-typed and immutable once created; `id` is unique within
/// a source, making `(source, id)` globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload — validated against a task type's declared shape only
    /// at the executor boundary, never here.
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            kind: kind.into(),
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A source of events feeding into the runtime's single bounded channel.
///
/// Implementations begin producing into `out` from within `subscribe` and
/// return promptly; the actual production runs in a background task bound
/// to `cancellation`.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable name used in logs and router rules.
    fn name(&self) -> &str;

    /// Begin producing events into `out`. Must return promptly; ongoing
    /// production continues in a task owned by the source.
    async fn subscribe(
        &self,
        cancellation: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> anyhow::Result<()>;

    /// Acknowledge that an event has been committed, for sources that need
    /// at-least-once delivery bookkeeping. A no-op for sources that don't.
    async fn ack(&self, _event_id: &str) {}
}

/// Handles exactly one event at a time, sequentially, on behalf of an agent
/// identity. Defined here (rather than alongside the agent implementation)
/// so the dispatcher can depend on the contract without depending on the
/// concrete agent crate.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable id this handler is addressed by in router rules.
    fn agent_id(&self) -> &str;

    /// Handle one event to completion. Concurrent calls for the same
    /// handler are not supported — callers must not invoke this
    /// concurrently for a single agent identity.
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_has_unique_id() {
        let a = Event::new("chat", "message", serde_json::json!({}));
        let b = Event::new("chat", "message", serde_json::json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn with_metadata_sets_key() {
        let e = Event::new("cron", "tick", serde_json::json!(null)).with_metadata("job", "daily");
        assert_eq!(e.metadata.get("job").map(String::as_str), Some("daily"));
    }
}
