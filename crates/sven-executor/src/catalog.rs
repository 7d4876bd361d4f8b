// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// A single entry in the closed task-type catalog: the permissions it
/// requires and the fields its params object must carry.
pub struct TaskTypeSpec {
    pub name: &'static str,
    pub permissions: &'static [&'static str],
    pub required_fields: &'static [&'static str],
}

pub const CATALOG: &[TaskTypeSpec] = &[
    TaskTypeSpec {
        name: "scm.read",
        permissions: &["read-source"],
        required_fields: &["path"],
    },
    TaskTypeSpec {
        name: "scm.write",
        permissions: &["write-source"],
        required_fields: &["path", "content"],
    },
    TaskTypeSpec {
        name: "scm.exec",
        permissions: &["exec-source"],
        required_fields: &["command"],
    },
    TaskTypeSpec {
        name: "cluster.read",
        permissions: &["read-cluster-logs"],
        required_fields: &["resource"],
    },
    TaskTypeSpec {
        name: "issue.read",
        permissions: &["read-issues"],
        required_fields: &["issue_id"],
    },
    TaskTypeSpec {
        name: "issue.write",
        permissions: &["write-issues"],
        required_fields: &["issue_id", "body"],
    },
    TaskTypeSpec {
        name: "chat.send",
        permissions: &["post-chat"],
        required_fields: &["channel", "message"],
    },
    TaskTypeSpec {
        name: "chat.read",
        permissions: &["read-chat"],
        required_fields: &["channel"],
    },
    TaskTypeSpec {
        name: "policy.list",
        permissions: &["policy-admin"],
        required_fields: &[],
    },
    TaskTypeSpec {
        name: "policy.set",
        permissions: &["policy-admin"],
        required_fields: &["permission", "level"],
    },
    TaskTypeSpec {
        name: "policy.reset",
        permissions: &["policy-admin"],
        required_fields: &["permission"],
    },
    TaskTypeSpec {
        name: "cluster.alert.triage",
        permissions: &["read-cluster-logs", "post-chat"],
        required_fields: &["alert_id"],
    },
];

pub fn lookup(task_type: &str) -> Option<&'static TaskTypeSpec> {
    CATALOG.iter().find(|spec| spec.name == task_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_has_at_least_one_permission() {
        for spec in CATALOG {
            assert!(!spec.permissions.is_empty(), "{} has no permissions", spec.name);
        }
    }

    #[test]
    fn lookup_is_case_sensitive_and_exact() {
        assert!(lookup("scm.read").is_some());
        assert!(lookup("scm.Read").is_none());
        assert!(lookup("unknown.type").is_none());
    }
}
