// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end coverage across crate boundaries: a ticker source routed
//! through the dispatcher to a mock-backed agent, a task dispatched through
//! the executor under a permission policy, and the config loader's defaults.

use std::sync::Arc;
use std::time::Duration;

use sven_config::{AgentRole, Config};
use sven_core::{Agent, AgentEvent, AgentIdentity};
use sven_executor::{ChatClient, ClusterClient, IssueClient, ScmClient, TaskExecutor};
use sven_model::MockProvider;
use sven_runtime::{Dispatcher, EventHandler};
use sven_scheduler::{TickerJob, TickerSource};
use sven_store::{Store, Task, TaskStatus};
use sven_supervisor::{InMemoryAuditLog, PolicyLevel, Supervisor};
use sven_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.model.provider, "mock");
    assert_eq!(cfg.runtime.event_channel_capacity, 256);
    assert_eq!(cfg.runtime.max_concurrency, 4);
    assert_eq!(cfg.runtime.max_tool_iter, 10);
}

#[tokio::test]
async fn ticker_event_drives_agent_turn_to_completion() {
    let identity = AgentIdentity::new("responder", AgentRole::General);
    let agent_id = identity.id.clone();
    let model: Arc<dyn sven_model::ModelProvider> = Arc::new(MockProvider);
    let agent = Arc::new(Agent::new(identity, model, Arc::new(ToolRegistry::new()), None));
    let mut events = agent.subscribe();

    let mut dispatcher = Dispatcher::new(8, 2);
    dispatcher.register_source(Arc::new(TickerSource::new(vec![TickerJob::interval_job(
        "heartbeat", "20ms",
    )])));
    dispatcher.register_handler(agent.clone() as Arc<dyn EventHandler>);

    let cancellation = CancellationToken::new();
    let cancel_clone = cancellation.clone();
    let run_handle = tokio::spawn(async move { dispatcher.run(cancellation).await });

    let observed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(AgentEvent::TurnComplete(text)) => return text,
                Ok(_) => continue,
                Err(_) => panic!("agent event channel closed before a turn completed"),
            }
        }
    })
    .await
    .expect("agent should complete a turn from the ticker event within the timeout");

    assert!(observed.contains("MOCK"));
    assert_eq!(agent_id, agent.identity().id);

    cancel_clone.cancel();
    run_handle.await.unwrap().unwrap();
}

struct NoopScm;
#[async_trait::async_trait]
impl ScmClient for NoopScm {
    async fn read(&self, path: &str) -> anyhow::Result<String> {
        Ok(format!("contents of {path}"))
    }
    async fn write(&self, _path: &str, _content: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn exec(&self, _command: &str) -> anyhow::Result<String> {
        Ok("ok".to_string())
    }
}

struct NoopCluster;
#[async_trait::async_trait]
impl ClusterClient for NoopCluster {
    async fn read(&self, _resource: &str) -> anyhow::Result<String> {
        Ok("{}".to_string())
    }
    async fn triage_alert(&self, _alert_id: &str) -> anyhow::Result<String> {
        Ok("triaged".to_string())
    }
}

struct NoopIssue;
#[async_trait::async_trait]
impl IssueClient for NoopIssue {
    async fn read(&self, _issue_id: &str) -> anyhow::Result<String> {
        Ok("issue body".to_string())
    }
    async fn write(&self, _issue_id: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NoopChat;
#[async_trait::async_trait]
impl ChatClient for NoopChat {
    async fn send(&self, _channel: &str, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn read(&self, _channel: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }
    async fn post_approval_prompt(
        &self,
        _request_id: uuid::Uuid,
        _permission: &str,
        _resource: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn post_approval_denied(&self, _request_id: uuid::Uuid) -> anyhow::Result<()> {
        Ok(())
    }
    async fn post_approval_granted(&self, _request_id: uuid::Uuid, _task_id: uuid::Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn auto_approved_task_runs_end_to_end_through_store_and_executor() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("integration.db")).await.unwrap());
    let audit = Arc::new(InMemoryAuditLog::new());
    let supervisor = Arc::new(Supervisor::new(Vec::<String>::new(), audit.clone()));
    supervisor.set_policy("read-source".to_string(), PolicyLevel::AutoApprove);

    let executor = TaskExecutor::new(
        supervisor,
        store.clone(),
        audit,
        Arc::new(NoopScm),
        Arc::new(NoopCluster),
        Arc::new(NoopIssue),
        Arc::new(NoopChat),
    );

    let task = Task::new("scm.read", serde_json::json!({"path": "README.md"}), "user-1");
    let task_id = task.id;
    store.upsert_task(task).await.unwrap();

    let output = executor.execute(task_id).await.unwrap();
    assert_eq!(output, "contents of README.md");

    let stored = store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}
