// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use sven_config::Config;
use sven_core::{Agent, AgentIdentity};
use sven_executor::{ChatClient, ClusterClient, IssueClient, ScmClient, TaskExecutor};
use sven_gateway::HttpIngressSource;
use sven_memory::{MemoryStore, SqliteMemoryStore};
use sven_runtime::{Dispatcher, Event, EventHandler, RouterRule};
use sven_scheduler::{TickerJob, TickerSource};
use sven_store::{AuditEntry, Store, Task};
use sven_supervisor::{AuditRecord, AuditSink, Supervisor};
use sven_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Agent id reserved for the retention sweep; never a configured agent's id.
const RETENTION_AGENT_ID: &str = "sven-retention";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = sven_config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or_default() {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Wires together the pieces spec'd in §4 and runs the dispatcher until a
/// shutdown signal arrives. This function is deliberately the only place in
/// the workspace that knows about all of them at once — every other crate
/// depends only on the traits it needs.
async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(
        Store::open(config.runtime.db_path.clone())
            .await
            .context("opening persistent store")?,
    );

    // Startup recovery (spec §4.7, design note): mark `running` tasks
    // failed with a recovery note, then hand back `pending` ids for
    // re-enqueue. In-flight turns are not resumed.
    let stuck = store.fail_stuck().await.context("recovering stuck tasks")?;
    let requeued = store.requeue_pending().await.context("listing pending tasks")?;
    if stuck > 0 || !requeued.is_empty() {
        tracing::info!(stuck, requeued = requeued.len(), "startup recovery complete");
    }

    let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditSink(store.clone()));
    let supervisor = Arc::new(Supervisor::new(config.runtime.admin_users.clone(), audit.clone()));

    let executor = Arc::new(TaskExecutor::new(
        supervisor.clone(),
        store.clone(),
        audit.clone(),
        Arc::new(UnconfiguredScm) as Arc<dyn ScmClient>,
        Arc::new(UnconfiguredCluster) as Arc<dyn ClusterClient>,
        Arc::new(UnconfiguredIssue) as Arc<dyn IssueClient>,
        Arc::new(UnconfiguredChat) as Arc<dyn ChatClient>,
    ));

    let memory: Arc<dyn MemoryStore> = Arc::new(
        SqliteMemoryStore::new(&config.runtime.db_path).context("opening memory store")?,
    );

    let mut dispatcher = Dispatcher::new(
        config.runtime.event_channel_capacity,
        config.runtime.max_concurrency,
    );

    let mut agent_ids = Vec::with_capacity(config.agents.len());
    for def in &config.agents {
        let model_cfg = if def.model.is_empty() {
            config.model.clone()
        } else {
            config
                .providers
                .get(&def.model)
                .cloned()
                .unwrap_or_else(|| config.model.clone())
        };
        let model = sven_model::from_config(&model_cfg)
            .with_context(|| format!("building model provider for agent {}", def.id))?
            .into();
        let identity = AgentIdentity::from_def(def);
        agent_ids.push(identity.id.clone());

        let mut tools = ToolRegistry::new();
        tools
            .register(DispatchTaskTool {
                executor: executor.clone(),
                store: store.clone(),
                caller_id: identity.id.clone(),
            })
            .expect("dispatch_task is the only tool registered per agent");

        let agent = Arc::new(Agent::with_max_tool_iter(
            identity,
            model,
            Arc::new(tools),
            Some(memory.clone()),
            config.runtime.max_tool_iter,
        ));
        dispatcher.register_handler(agent as Arc<dyn EventHandler>);
    }

    // Hourly retention sweep (spec §4.7): a dedicated ticker job feeds a
    // dedicated handler, kept off the broadcast path so it never competes
    // with real agents for unrelated events.
    dispatcher.register_source(Arc::new(TickerSource::new(vec![TickerJob::interval_job(
        "retention",
        "1h",
    )])));
    dispatcher.register_handler(Arc::new(RetentionHandler {
        store: store.clone(),
    }) as Arc<dyn EventHandler>);
    dispatcher.set_rules(vec![
        RouterRule::new()
            .with_source("cron")
            .with_metadata_prefix("job", "retention")
            .with_agents(vec![RETENTION_AGENT_ID.to_string()]),
        RouterRule::new().with_agents(agent_ids),
    ]);

    dispatcher.register_source(Arc::new(HttpIngressSource::new(
        "webhook",
        config.runtime.webhook_addr.clone(),
        config.runtime.webhook_path.clone(),
        config.runtime.webhook_secret.clone(),
    )));

    let cancellation = CancellationToken::new();
    let shutdown_token = cancellation.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight work");
        shutdown_token.cancel();
    });

    dispatcher.run(cancellation).await
}

/// Lets an agent hand a typed task (spec §4.6's closed catalog, e.g.
/// `scm.read`, `chat.send`, `policy.set`) to the executor. Permission
/// gating, approval prompts, and audit trail are the executor's job; this
/// tool only persists the task row and kicks off `execute`.
struct DispatchTaskTool {
    executor: Arc<TaskExecutor>,
    store: Arc<Store>,
    caller_id: String,
}

#[async_trait::async_trait]
impl Tool for DispatchTaskTool {
    fn name(&self) -> &str {
        "dispatch_task"
    }

    fn description(&self) -> &str {
        "Dispatch a typed task (scm.*, cluster.*, issue.*, chat.*, policy.*) for supervised execution"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_type": { "type": "string" },
                "params": { "type": "object" }
            },
            "required": ["task_type", "params"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let task_type = match call.args.get("task_type").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => return ToolOutput::err(&call.id, "task_type is required"),
        };
        let params = call.args.get("params").cloned().unwrap_or(serde_json::json!({}));

        let task = Task::new(task_type, params, self.caller_id.clone());
        let task_id = task.id;
        if let Err(e) = self.store.upsert_task(task).await {
            return ToolOutput::err(&call.id, format!("failed to enqueue task: {e}"));
        }

        match self.executor.execute(task_id).await {
            Ok(output) => ToolOutput::ok(&call.id, output),
            Err(sven_executor::TaskError::PermissionPending) => {
                ToolOutput::ok(&call.id, format!("task {task_id} queued, awaiting approval"))
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

/// Runs the persistent store's retention sweep on each matching tick
/// (spec §4.7). Never subscribed to anything but the dedicated `cron`
/// ticker job routed to it in `run`.
struct RetentionHandler {
    store: Arc<Store>,
}

#[async_trait::async_trait]
impl EventHandler for RetentionHandler {
    fn agent_id(&self) -> &str {
        RETENTION_AGENT_ID
    }

    async fn handle(&self, _event: Event) -> anyhow::Result<()> {
        let report = self.store.run_retention(chrono::Utc::now()).await?;
        tracing::info!(?report, "retention sweep complete");
        Ok(())
    }
}

/// Bridges the supervisor's [`AuditSink`] into the persistent store's
/// `audit_log` table (spec §3 Audit entry, §4.7).
struct StoreAuditSink(Arc<Store>);

#[async_trait::async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(&self, entry: AuditRecord) {
        let row = AuditEntry {
            id: entry.id,
            timestamp: entry.timestamp,
            user_id: entry.user_id,
            user_name: entry.user_name,
            action: entry.action,
            resource: entry.resource,
            result: entry.result,
            details: entry.details,
        };
        if let Err(e) = self.0.record_audit(row).await {
            tracing::warn!(error = %e, "failed to persist audit entry");
        }
    }
}

/// Placeholder collaborators for the concrete external integrations spec §1
/// declares out of scope. A real deployment supplies its own
/// `ScmClient`/`ClusterClient`/`IssueClient`/`ChatClient` implementations;
/// these exist only so the executor has something to construct against.
macro_rules! unconfigured {
    ($name:ident) => {
        anyhow::bail!(concat!(stringify!($name), " is not configured in this build"))
    };
}

struct UnconfiguredScm;
#[async_trait::async_trait]
impl ScmClient for UnconfiguredScm {
    async fn read(&self, _path: &str) -> anyhow::Result<String> {
        unconfigured!(ScmClient)
    }
    async fn write(&self, _path: &str, _content: &str) -> anyhow::Result<()> {
        unconfigured!(ScmClient)
    }
    async fn exec(&self, _command: &str) -> anyhow::Result<String> {
        unconfigured!(ScmClient)
    }
}

struct UnconfiguredCluster;
#[async_trait::async_trait]
impl ClusterClient for UnconfiguredCluster {
    async fn read(&self, _resource: &str) -> anyhow::Result<String> {
        unconfigured!(ClusterClient)
    }
    async fn triage_alert(&self, _alert_id: &str) -> anyhow::Result<String> {
        unconfigured!(ClusterClient)
    }
}

struct UnconfiguredIssue;
#[async_trait::async_trait]
impl IssueClient for UnconfiguredIssue {
    async fn read(&self, _issue_id: &str) -> anyhow::Result<String> {
        unconfigured!(IssueClient)
    }
    async fn write(&self, _issue_id: &str, _body: &str) -> anyhow::Result<()> {
        unconfigured!(IssueClient)
    }
}

struct UnconfiguredChat;
#[async_trait::async_trait]
impl ChatClient for UnconfiguredChat {
    async fn send(&self, _channel: &str, _message: &str) -> anyhow::Result<()> {
        unconfigured!(ChatClient)
    }
    async fn read(&self, _channel: &str) -> anyhow::Result<Vec<String>> {
        unconfigured!(ChatClient)
    }
    async fn post_approval_prompt(
        &self,
        _request_id: Uuid,
        _permission: &str,
        _resource: &str,
    ) -> anyhow::Result<()> {
        unconfigured!(ChatClient)
    }
    async fn post_approval_denied(&self, _request_id: Uuid) -> anyhow::Result<()> {
        unconfigured!(ChatClient)
    }
    async fn post_approval_granted(&self, _request_id: Uuid, _task_id: Uuid) -> anyhow::Result<()> {
        unconfigured!(ChatClient)
    }
}
