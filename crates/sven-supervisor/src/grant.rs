// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::permission::Permission;

/// A time-bounded authorisation for exactly one `(permission, task-id)` pair.
#[derive(Debug, Clone)]
pub struct Grant {
    pub id: Uuid,
    pub permission: Permission,
    pub granted_to: String,
    pub granted_by: String,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Grant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory store of active grants, keyed by `(permission, task-id)`.
/// Safe under concurrent access via an internal read-write lock.
#[derive(Debug, Default)]
pub struct GrantStore {
    grants: RwLock<HashMap<(Permission, Uuid), Grant>>,
}

impl GrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, grant: Grant) {
        self.grants
            .write()
            .unwrap()
            .insert((grant.permission.clone(), grant.task_id), grant);
    }

    /// Returns true iff an unexpired grant exists for `(permission, task_id)`.
    pub fn check(&self, permission: &str, task_id: Uuid, now: DateTime<Utc>) -> bool {
        self.grants
            .read()
            .unwrap()
            .get(&(permission.to_string(), task_id))
            .is_some_and(|g| !g.is_expired(now))
    }

    /// Removes every entry whose `expires_at <= now`. Returns the count removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut grants = self.grants.write().unwrap();
        let before = grants.len();
        grants.retain(|_, g| !g.is_expired(now));
        before - grants.len()
    }

    pub fn len(&self) -> usize {
        self.grants.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(permission: &str, task_id: Uuid, created_at: DateTime<Utc>, ttl: Duration) -> Grant {
        Grant {
            id: Uuid::new_v4(),
            permission: permission.to_string(),
            granted_to: "user-1".into(),
            granted_by: "policy".into(),
            task_id,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    #[test]
    fn check_true_iff_unexpired_grant_exists() {
        let store = GrantStore::new();
        let task_id = Uuid::new_v4();
        let now = Utc::now();
        store.insert(grant("write-source", task_id, now, Duration::minutes(5)));

        assert!(store.check("write-source", task_id, now));
        assert!(!store.check("write-source", task_id, now + Duration::minutes(10)));
        assert!(!store.check("read-cluster-logs", task_id, now));
    }

    #[test]
    fn cleanup_removes_only_expired_entries() {
        let store = GrantStore::new();
        let now = Utc::now();
        store.insert(grant("a", Uuid::new_v4(), now - Duration::hours(1), Duration::minutes(1)));
        store.insert(grant("b", Uuid::new_v4(), now, Duration::hours(1)));

        let removed = store.cleanup(now);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }
}
