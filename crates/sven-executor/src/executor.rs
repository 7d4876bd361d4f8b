// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use sven_store::{PendingApproval, Store, Task, TaskStatus};
use sven_supervisor::{AuditRecord, AuditSink, Supervisor};

use crate::catalog::{self, TaskTypeSpec};
use crate::collaborators::{ChatClient, ClusterClient, IssueClient, ScmClient};
use crate::error::TaskError;

const MAX_ERROR_LEN: usize = 500;

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

/// Best-effort extraction of the resource a task acts on, for approval
/// prompts and audit entries; falls back to the task type when no field
/// in `params` obviously names one.
fn resource_of(task: &Task) -> String {
    for field in ["path", "resource", "issue_id", "channel", "alert_id", "command"] {
        if let Some(v) = task.params.get(field).and_then(|v| v.as_str()) {
            return v.to_string();
        }
    }
    task.task_type.clone()
}

/// Dispatches typed tasks: decode/validate params, gate on the supervisor's
/// permission check, invoke the relevant external collaborator, record an
/// audit entry with the outcome.
pub struct TaskExecutor {
    supervisor: Arc<Supervisor>,
    store: Arc<Store>,
    audit: Arc<dyn AuditSink>,
    scm: Arc<dyn ScmClient>,
    cluster: Arc<dyn ClusterClient>,
    issue: Arc<dyn IssueClient>,
    chat: Arc<dyn ChatClient>,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor: Arc<Supervisor>,
        store: Arc<Store>,
        audit: Arc<dyn AuditSink>,
        scm: Arc<dyn ScmClient>,
        cluster: Arc<dyn ClusterClient>,
        issue: Arc<dyn IssueClient>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            supervisor,
            store,
            audit,
            scm,
            cluster,
            issue,
            chat,
        }
    }

    /// Runs one task end to end. Returns the decoded result string on
    /// success; the task row itself always reflects the final outcome
    /// regardless of what this call returns.
    pub async fn execute(&self, task_id: Uuid) -> Result<String, TaskError> {
        let task = self.store.get_task(task_id).await?.ok_or(TaskError::NotFound)?;

        let spec = match catalog::lookup(&task.task_type) {
            Some(spec) => spec,
            None => {
                self.fail(&task, "unsupported task type".to_string()).await?;
                return Err(TaskError::UnsupportedTaskType(task.task_type.clone()));
            }
        };

        if let Err(field) = self.validate(&task, spec) {
            let msg = format!("{field} is required");
            self.fail(&task, msg).await?;
            return Err(TaskError::MissingField(field));
        }

        let permissions: Vec<String> = spec.permissions.iter().map(|p| p.to_string()).collect();
        let outcome = self
            .supervisor
            .request_permissions(&permissions, &task.caller_id, task_id)
            .await;

        if !outcome.denied.is_empty() {
            let msg = format!("permission denied: {}", outcome.denied.join(", "));
            self.fail(&task, msg.clone()).await?;
            return Err(TaskError::PermissionDenied(outcome.denied.join(", ")));
        }

        if !outcome.pending.is_empty() {
            let mut task = task;
            task.status = TaskStatus::RequiresApproval;
            task.updated_at = Utc::now();
            self.store.upsert_task(task.clone()).await?;

            let resource = resource_of(&task);
            for (permission, request_id) in &outcome.pending {
                self.store
                    .save_approval(PendingApproval {
                        request_id: *request_id,
                        task_id,
                        caller_id: task.caller_id.clone(),
                        permission: permission.clone(),
                        action: task.task_type.clone(),
                        resource: resource.clone(),
                        channel: task.response_channel.clone(),
                        thread: task.response_thread.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;

                if let Err(e) = self
                    .chat
                    .post_approval_prompt(*request_id, permission, &resource)
                    .await
                {
                    warn!(error = %e, %request_id, "failed to post approval prompt");
                }
            }

            return Err(TaskError::PermissionPending);
        }

        self.store.update_task_status(task_id, TaskStatus::Running).await?;

        let result = self.invoke(&task).await;
        match result {
            Ok(output) => {
                self.store
                    .complete_task(task_id, TaskStatus::Completed, Some(output.clone()), None)
                    .await?;
                self.audit_outcome(&task, "completed", None).await;
                Ok(output)
            }
            Err(e) => {
                let msg = truncate(&e.to_string(), MAX_ERROR_LEN);
                self.store
                    .complete_task(task_id, TaskStatus::Failed, None, Some(msg.clone()))
                    .await?;
                self.audit_outcome(&task, "failed", Some(msg.clone())).await;
                Err(TaskError::Collaborator(msg))
            }
        }
    }

    fn validate(&self, task: &Task, spec: &TaskTypeSpec) -> Result<(), String> {
        for field in spec.required_fields {
            if task.params.get(*field).is_none() {
                return Err(field.to_string());
            }
        }
        Ok(())
    }

    async fn fail(&self, task: &Task, error: String) -> Result<(), TaskError> {
        self.store
            .complete_task(task.id, TaskStatus::Failed, None, Some(error.clone()))
            .await?;
        self.audit_outcome(task, "failed", Some(error)).await;
        Ok(())
    }

    async fn audit_outcome(&self, task: &Task, result: &str, details: Option<String>) {
        let mut record = AuditRecord::new(
            task.caller_id.clone(),
            format!("task.{}", task.task_type),
            resource_of(task),
            result.to_string(),
        );
        if let Some(details) = details {
            record = record.with_details(details);
        }
        self.audit.record(record).await;
    }

    async fn invoke(&self, task: &Task) -> anyhow::Result<String> {
        let p = &task.params;
        let field = |name: &str| -> anyhow::Result<String> {
            p.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("{name} is required"))
        };

        match task.task_type.as_str() {
            "scm.read" => self.scm.read(&field("path")?).await,
            "scm.write" => {
                self.scm.write(&field("path")?, &field("content")?).await?;
                Ok("ok".to_string())
            }
            "scm.exec" => self.scm.exec(&field("command")?).await,
            "cluster.read" => self.cluster.read(&field("resource")?).await,
            "cluster.alert.triage" => self.cluster.triage_alert(&field("alert_id")?).await,
            "issue.read" => self.issue.read(&field("issue_id")?).await,
            "issue.write" => {
                self.issue.write(&field("issue_id")?, &field("body")?).await?;
                Ok("ok".to_string())
            }
            "chat.send" => {
                self.chat.send(&field("channel")?, &field("message")?).await?;
                Ok("ok".to_string())
            }
            "chat.read" => {
                let messages = self.chat.read(&field("channel")?).await?;
                Ok(serde_json::to_string(&messages)?)
            }
            "policy.list" => {
                let snapshot = self.supervisor.policy_snapshot();
                Ok(serde_json::to_string(&snapshot)?)
            }
            "policy.set" => {
                let permission = field("permission")?;
                let level_str = field("level")?;
                let level = parse_policy_level(&level_str)?;
                self.supervisor
                    .apply_policy_change(&permission, level, &task.caller_id, "via policy.set task")
                    .await?;
                Ok("ok".to_string())
            }
            "policy.reset" => {
                let permission = field("permission")?;
                self.supervisor.reset_policy(&permission, &task.caller_id).await?;
                Ok("ok".to_string())
            }
            other => Err(anyhow::anyhow!("unsupported task type: {other}")),
        }
    }

    /// Handles an inbound approval decision, correlating it back to the
    /// pending-approval row and re-enqueuing the task on approval.
    pub async fn handle_approval(&self, request_id: Uuid, approved: bool, decided_by: &str) -> Result<(), TaskError> {
        let approval = match self.store.get_approval(request_id).await? {
            Some(a) => a,
            None => {
                warn!(%request_id, "no pending approval for this request id, ignoring");
                return Ok(());
            }
        };
        self.store.delete_approval(request_id).await?;

        if !approved {
            self.supervisor
                .deny(request_id, decided_by)
                .await
                .map_err(|e| TaskError::Collaborator(e.to_string()))?;
            if let Err(e) = self.chat.post_approval_denied(request_id).await {
                warn!(error = %e, %request_id, "failed to post denial message");
            }
            return Ok(());
        }

        self.supervisor
            .grant_permission(&approval.permission, &approval.caller_id, decided_by, approval.task_id)
            .await;

        self.store.update_task_status(approval.task_id, TaskStatus::Pending).await?;

        if let Err(e) = self.chat.post_approval_granted(request_id, approval.task_id).await {
            warn!(error = %e, %request_id, "failed to post approval-granted message");
        }

        Ok(())
    }
}

fn parse_policy_level(s: &str) -> anyhow::Result<sven_supervisor::PolicyLevel> {
    use sven_supervisor::PolicyLevel;
    Ok(match s {
        "auto-approve" => PolicyLevel::AutoApprove,
        "notify-then-do" => PolicyLevel::NotifyThenDo,
        "require-approval" => PolicyLevel::RequireApproval,
        "always-deny" => PolicyLevel::AlwaysDeny,
        other => anyhow::bail!("unknown policy level: {other}"),
    })
}
