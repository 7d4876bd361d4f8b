// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::grant::{Grant, GrantStore};
use crate::permission::{Permission, PolicyLevel};
use crate::policy::PolicyTable;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0} is not an admin")]
    NotAdmin(String),
    #[error("no pending approval request {0}")]
    RequestNotFound(Uuid),
}

/// A `require-approval` request awaiting a human decision.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: Uuid,
    pub permission: Permission,
    pub caller: String,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Result of a [`Supervisor::request_permissions`] call.
#[derive(Debug, Clone, Default)]
pub struct PermissionOutcome {
    pub granted: Vec<Permission>,
    pub pending: Vec<(Permission, Uuid)>,
    pub denied: Vec<Permission>,
}

impl PermissionOutcome {
    pub fn all_granted(&self) -> bool {
        self.pending.is_empty() && self.denied.is_empty()
    }
}

/// The single chokepoint for "may this be done?" decisions: permission
/// classification, approval lifecycle, time-limited grants, admin gating.
pub struct Supervisor {
    policy: PolicyTable,
    grants: GrantStore,
    pending: RwLock<HashMap<Uuid, PendingRequest>>,
    admins: HashSet<String>,
    audit: Arc<dyn AuditSink>,
    auto_approve_ttl: Duration,
    human_approve_ttl: Duration,
}

impl Supervisor {
    pub fn new(admins: impl IntoIterator<Item = String>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            policy: PolicyTable::default(),
            grants: GrantStore::new(),
            pending: RwLock::new(HashMap::new()),
            admins: admins.into_iter().collect(),
            audit,
            auto_approve_ttl: Duration::minutes(15),
            human_approve_ttl: Duration::hours(8),
        }
    }

    pub fn with_policy(self, permission: impl Into<String>, level: PolicyLevel) -> Self {
        self.policy.set_level(permission, level);
        self
    }

    /// Sets a permission's policy level directly, without going through
    /// [`Supervisor::apply_policy_change`]'s admin gate or audit trail.
    /// Intended for test setup and startup configuration loading.
    pub fn set_policy(&self, permission: impl Into<String>, level: PolicyLevel) {
        self.policy.set_level(permission, level);
    }

    pub fn with_ttls(mut self, auto_approve: Duration, human_approve: Duration) -> Self {
        self.auto_approve_ttl = auto_approve;
        self.human_approve_ttl = human_approve;
        self
    }

    /// An empty admin set means "everyone is admin" (bootstrap convenience).
    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.is_empty() || self.admins.contains(user)
    }

    pub fn policy_level(&self, permission: &str) -> PolicyLevel {
        self.policy.level_of(permission)
    }

    pub fn check(&self, permission: &str, task_id: Uuid) -> bool {
        self.grants.check(permission, task_id, Utc::now())
    }

    pub fn cleanup_grants(&self) -> usize {
        self.grants.cleanup(Utc::now())
    }

    async fn audit(&self, record: AuditRecord) {
        self.audit.record(record).await;
    }

    fn mint_grant(&self, permission: &Permission, granted_to: &str, granted_by: &str, task_id: Uuid, ttl: Duration) {
        let now = Utc::now();
        self.grants.insert(Grant {
            id: Uuid::new_v4(),
            permission: permission.clone(),
            granted_to: granted_to.to_string(),
            granted_by: granted_by.to_string(),
            task_id,
            created_at: now,
            expires_at: now + ttl,
        });
    }

    /// Classifies each requested permission against current policy, minting
    /// short-TTL grants for auto-approve/notify-then-do, queuing a pending
    /// request for require-approval, and recording always-deny as a denial.
    /// A grant already unexpired for `(permission, task_id)` short-circuits
    /// straight to `granted` — but only when the current policy level isn't
    /// `always-deny`: spec §3's invariant that `always-deny` overrides any
    /// existing grant takes priority over the §4.5 short-circuit rule, so
    /// policy is consulted first on every call.
    pub async fn request_permissions(
        &self,
        permissions: &[Permission],
        caller: &str,
        task_id: Uuid,
    ) -> PermissionOutcome {
        let mut outcome = PermissionOutcome::default();

        for permission in permissions {
            let level = self.policy_level(permission);

            if level != PolicyLevel::AlwaysDeny && self.check(permission, task_id) {
                outcome.granted.push(permission.clone());
                continue;
            }

            match level {
                PolicyLevel::AutoApprove => {
                    self.mint_grant(permission, caller, "policy", task_id, self.auto_approve_ttl);
                    self.audit(
                        AuditRecord::new(caller, "auto_approved", permission.clone(), "granted")
                            .with_details(format!("task {task_id}")),
                    )
                    .await;
                    outcome.granted.push(permission.clone());
                }
                PolicyLevel::NotifyThenDo => {
                    self.mint_grant(permission, caller, "policy", task_id, self.auto_approve_ttl);
                    self.audit(
                        AuditRecord::new(caller, "notify_then_do", permission.clone(), "granted")
                            .with_details(format!("task {task_id}")),
                    )
                    .await;
                    outcome.granted.push(permission.clone());
                }
                PolicyLevel::RequireApproval => {
                    let request_id = Uuid::new_v4();
                    self.pending.write().unwrap().insert(
                        request_id,
                        PendingRequest {
                            request_id,
                            permission: permission.clone(),
                            caller: caller.to_string(),
                            task_id,
                            created_at: Utc::now(),
                        },
                    );
                    self.audit(
                        AuditRecord::new(caller, "pending_approval", permission.clone(), "pending")
                            .with_details(format!("task {task_id} request {request_id}")),
                    )
                    .await;
                    outcome.pending.push((permission.clone(), request_id));
                }
                PolicyLevel::AlwaysDeny => {
                    self.audit(
                        AuditRecord::new(caller, "denied_by_policy", permission.clone(), "denied")
                            .with_details(format!("task {task_id}")),
                    )
                    .await;
                    outcome.denied.push(permission.clone());
                }
            }
        }

        outcome
    }

    /// Mints a long-TTL grant on behalf of a human approver, bypassing
    /// policy classification entirely (the approver's decision *is* the
    /// policy outcome for this one task).
    pub async fn grant_permission(
        &self,
        permission: &Permission,
        caller: &str,
        approver: &str,
        task_id: Uuid,
    ) -> Grant {
        let now = Utc::now();
        let grant = Grant {
            id: Uuid::new_v4(),
            permission: permission.clone(),
            granted_to: caller.to_string(),
            granted_by: approver.to_string(),
            task_id,
            created_at: now,
            expires_at: now + self.human_approve_ttl,
        };
        self.grants.insert(grant.clone());
        self.audit(
            AuditRecord::new(approver, "human_approved", permission.clone(), "granted")
                .with_details(format!("task {task_id} caller {caller}")),
        )
        .await;
        grant
    }

    pub async fn apply_policy_change(
        &self,
        permission: &Permission,
        new_level: PolicyLevel,
        applied_by: &str,
        reason: &str,
    ) -> Result<(), SupervisorError> {
        if !self.is_admin(applied_by) {
            self.audit(
                AuditRecord::new(applied_by, "policy_change_denied", permission.clone(), "denied")
                    .with_details(reason.to_string()),
            )
            .await;
            return Err(SupervisorError::NotAdmin(applied_by.to_string()));
        }

        self.policy.set_level(permission.clone(), new_level);
        self.audit(
            AuditRecord::new(applied_by, "policy_changed", permission.clone(), new_level.to_string())
                .with_details(reason.to_string()),
        )
        .await;
        Ok(())
    }

    pub async fn reset_policy(&self, permission: &Permission, applied_by: &str) -> Result<(), SupervisorError> {
        if !self.is_admin(applied_by) {
            self.audit(
                AuditRecord::new(applied_by, "policy_reset_denied", permission.clone(), "denied"),
            )
            .await;
            return Err(SupervisorError::NotAdmin(applied_by.to_string()));
        }

        self.policy.reset(permission);
        self.audit(AuditRecord::new(applied_by, "policy_reset", permission.clone(), "reset"))
            .await;
        Ok(())
    }

    pub fn policy_snapshot(&self) -> HashMap<Permission, PolicyLevel> {
        self.policy.snapshot()
    }

    pub async fn approve(&self, request_id: Uuid, approver: &str) -> Result<PendingRequest, SupervisorError> {
        let request = self
            .pending
            .write()
            .unwrap()
            .remove(&request_id)
            .ok_or(SupervisorError::RequestNotFound(request_id))?;

        self.audit(
            AuditRecord::new(approver, "approved", request.permission.clone(), "approved")
                .with_details(format!("task {} request {}", request.task_id, request_id)),
        )
        .await;
        Ok(request)
    }

    pub async fn deny(&self, request_id: Uuid, denier: &str) -> Result<PendingRequest, SupervisorError> {
        let request = self
            .pending
            .write()
            .unwrap()
            .remove(&request_id)
            .ok_or(SupervisorError::RequestNotFound(request_id))?;

        self.audit(
            AuditRecord::new(denier, "denied_by_human", request.permission.clone(), "denied")
                .with_details(format!("task {} request {}", request.task_id, request_id)),
        )
        .await;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;

    fn supervisor(admins: Vec<String>) -> (Arc<InMemoryAuditLog>, Supervisor) {
        let audit = Arc::new(InMemoryAuditLog::new());
        let sup = Supervisor::new(admins, audit.clone() as Arc<dyn AuditSink>);
        (audit, sup)
    }

    #[tokio::test]
    async fn auto_approve_grants_immediately_and_audits() {
        let (audit, sup) = supervisor(vec![]);
        let sup = sup.with_policy("write-chat", PolicyLevel::AutoApprove);
        let task_id = Uuid::new_v4();

        let outcome = sup
            .request_permissions(&["write-chat".to_string()], "userA", task_id)
            .await;

        assert_eq!(outcome.granted, vec!["write-chat".to_string()]);
        assert!(outcome.pending.is_empty());
        assert!(outcome.denied.is_empty());
        assert!(outcome.all_granted());
        assert!(sup.check("write-chat", task_id));

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "auto_approved");
    }

    #[tokio::test]
    async fn require_approval_then_grant_permission_unblocks_check() {
        let (_audit, sup) = supervisor(vec![]);
        let sup = sup.with_policy("write-source", PolicyLevel::RequireApproval);
        let task_id = Uuid::new_v4();

        let outcome = sup
            .request_permissions(&["write-source".to_string()], "userA", task_id)
            .await;
        assert!(!outcome.all_granted());
        assert_eq!(outcome.pending.len(), 1);
        assert!(!sup.check("write-source", task_id));

        sup.grant_permission(&"write-source".to_string(), "userA", "userAdmin", task_id)
            .await;
        assert!(sup.check("write-source", task_id));
    }

    #[tokio::test]
    async fn always_deny_denies_without_minting_grant() {
        let (_audit, sup) = supervisor(vec![]);
        let sup = sup.with_policy("deploy", PolicyLevel::AlwaysDeny);
        let task_id = Uuid::new_v4();

        let outcome = sup.request_permissions(&["deploy".to_string()], "userA", task_id).await;
        assert_eq!(outcome.denied, vec!["deploy".to_string()]);
        assert!(!sup.check("deploy", task_id));
    }

    #[tokio::test]
    async fn always_deny_overrides_an_existing_unexpired_grant() {
        let (_audit, sup) = supervisor(vec![]);
        let sup = sup.with_policy("deploy", PolicyLevel::AutoApprove);
        let task_id = Uuid::new_v4();

        // Auto-approve mints a grant for (deploy, task_id)...
        let outcome = sup.request_permissions(&["deploy".to_string()], "userA", task_id).await;
        assert_eq!(outcome.granted, vec!["deploy".to_string()]);
        assert!(sup.check("deploy", task_id));

        // ...then an admin locks the permission down within the grant's TTL.
        sup.apply_policy_change(&"deploy".to_string(), PolicyLevel::AlwaysDeny, "admin", "incident")
            .await
            .unwrap();

        let outcome = sup.request_permissions(&["deploy".to_string()], "userA", task_id).await;
        assert_eq!(outcome.denied, vec!["deploy".to_string()]);
        assert!(outcome.granted.is_empty());
    }

    #[tokio::test]
    async fn non_admin_cannot_apply_policy_change() {
        let (_audit, sup) = supervisor(vec!["admin1".to_string()]);
        let result = sup
            .apply_policy_change(&"deploy".to_string(), PolicyLevel::AutoApprove, "userA", "testing")
            .await;
        assert!(matches!(result, Err(SupervisorError::NotAdmin(_))));
    }

    #[tokio::test]
    async fn empty_admin_set_means_everyone_is_admin() {
        let (_audit, sup) = supervisor(vec![]);
        let result = sup
            .apply_policy_change(&"deploy".to_string(), PolicyLevel::AutoApprove, "userA", "testing")
            .await;
        assert!(result.is_ok());
        assert_eq!(sup.policy_level("deploy"), PolicyLevel::AutoApprove);
    }

    #[tokio::test]
    async fn approve_removes_pending_request() {
        let (_audit, sup) = supervisor(vec![]);
        let sup = sup.with_policy("write-source", PolicyLevel::RequireApproval);
        let task_id = Uuid::new_v4();
        let outcome = sup
            .request_permissions(&["write-source".to_string()], "userA", task_id)
            .await;
        let (_, request_id) = outcome.pending[0];

        let request = sup.approve(request_id, "admin").await.unwrap();
        assert_eq!(request.task_id, task_id);
        assert!(matches!(
            sup.approve(request_id, "admin").await,
            Err(SupervisorError::RequestNotFound(_))
        ));
    }
}
