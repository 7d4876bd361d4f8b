// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use crate::permission::{Permission, PolicyLevel};

/// Mutable permission → level table. Unlisted permissions fall back to a
/// configured default, kept deliberately conservative (`require-approval`)
/// unless the caller asks for something looser.
#[derive(Debug)]
pub struct PolicyTable {
    levels: RwLock<HashMap<Permission, PolicyLevel>>,
    default_level: PolicyLevel,
}

impl PolicyTable {
    pub fn new(default_level: PolicyLevel) -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
            default_level,
        }
    }

    pub fn with_levels(levels: HashMap<Permission, PolicyLevel>, default_level: PolicyLevel) -> Self {
        Self {
            levels: RwLock::new(levels),
            default_level,
        }
    }

    pub fn level_of(&self, permission: &str) -> PolicyLevel {
        self.levels
            .read()
            .unwrap()
            .get(permission)
            .copied()
            .unwrap_or(self.default_level)
    }

    pub fn set_level(&self, permission: impl Into<String>, level: PolicyLevel) {
        self.levels.write().unwrap().insert(permission.into(), level);
    }

    /// Resets a permission to the table's default level.
    pub fn reset(&self, permission: &str) {
        self.levels.write().unwrap().remove(permission);
    }

    /// Snapshot of explicit overrides (permissions never set fall back to
    /// the default level and are not listed).
    pub fn snapshot(&self) -> HashMap<Permission, PolicyLevel> {
        self.levels.read().unwrap().clone()
    }

    pub fn default_level(&self) -> PolicyLevel {
        self.default_level
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(PolicyLevel::RequireApproval)
    }
}
