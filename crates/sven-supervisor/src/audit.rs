// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Append-only record of a security-relevant decision.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: String,
    pub action: String,
    pub resource: String,
    pub result: String,
    pub details: Option<String>,
}

impl AuditRecord {
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            user_name: String::new(),
            action: action.into(),
            resource: resource.into(),
            result: result.into(),
            details: None,
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Receives audit records as the supervisor emits them. The supervisor owns
/// no storage of its own; a sink forwards into the persistent store (or, in
/// tests, into memory).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditRecord);
}

/// Discards every record. Useful where audit wiring is not under test.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _entry: AuditRecord) {}
}

/// Collects records in memory, for tests and small deployments that do not
/// need durability.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: tokio::sync::Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, entry: AuditRecord) {
        self.entries.lock().await.push(entry);
    }
}
