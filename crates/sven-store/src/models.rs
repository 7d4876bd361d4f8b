// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `pending → running → {completed|failed|requires-approval}`;
/// `requires-approval → pending` on grant. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RequiresApproval,
}

impl TaskStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RequiresApproval => "requires_approval",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "requires_approval" => Self::RequiresApproval,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub params: serde_json::Value,
    pub caller_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub response_channel: Option<String>,
    pub response_thread: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, params: serde_json::Value, caller_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            params,
            caller_id: caller_id.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            response_channel: None,
            response_thread: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// `{request-id, task-id, caller-id, permission, action, resource, channel, thread}`
/// persisted so an inbound approval decision received after restart can be
/// correlated back to the task that raised it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: Uuid,
    pub task_id: Uuid,
    pub caller_id: String,
    pub permission: String,
    pub action: String,
    pub resource: String,
    pub channel: Option<String>,
    pub thread: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable counterpart of an in-memory conversation context, used to
/// correlate asynchronous task completions back to a channel/thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub channel: String,
    pub thread: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Maps a chat-platform thread id to the session key addressing it in the
/// remote agent runtime, surviving restart so warm-session tracking and
/// reply routing keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSession {
    pub thread_id: String,
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// A message that failed to process after producer-side retries, scheduled
/// for retry or manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub resolved: bool,
}

impl DeadLetterEntry {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            attempts: 0,
            last_error: None,
            next_retry_at: Utc::now(),
            resolved: false,
        }
    }
}

/// Append-only record of a security-relevant decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: String,
    pub action: String,
    pub resource: String,
    pub result: String,
    pub details: Option<String>,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            action: action.into(),
            resource: resource.into(),
            result: result.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
