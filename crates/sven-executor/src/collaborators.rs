// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use uuid::Uuid;

/// Source-control read/write/exec, left to a concrete integration.
#[async_trait]
pub trait ScmClient: Send + Sync {
    async fn read(&self, path: &str) -> anyhow::Result<String>;
    async fn write(&self, path: &str, content: &str) -> anyhow::Result<()>;
    async fn exec(&self, command: &str) -> anyhow::Result<String>;
}

/// Cluster inspection, left to a concrete integration.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn read(&self, resource: &str) -> anyhow::Result<String>;
    async fn triage_alert(&self, alert_id: &str) -> anyhow::Result<String>;
}

/// Issue tracker read/write, left to a concrete integration.
#[async_trait]
pub trait IssueClient: Send + Sync {
    async fn read(&self, issue_id: &str) -> anyhow::Result<String>;
    async fn write(&self, issue_id: &str, body: &str) -> anyhow::Result<()>;
}

/// Chat posting/reading, and the supervisor-channel prompts the executor
/// raises around an approval's lifecycle.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, channel: &str, message: &str) -> anyhow::Result<()>;
    async fn read(&self, channel: &str) -> anyhow::Result<Vec<String>>;

    async fn post_approval_prompt(
        &self,
        request_id: Uuid,
        permission: &str,
        resource: &str,
    ) -> anyhow::Result<()>;

    async fn post_approval_denied(&self, request_id: Uuid) -> anyhow::Result<()>;
    async fn post_approval_granted(&self, request_id: Uuid, task_id: Uuid) -> anyhow::Result<()>;
}
