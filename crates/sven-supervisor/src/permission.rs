// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// A permission identifier, e.g. `"write-source"`, `"read-cluster-logs"`,
/// `"post-chat"`, `"deploy"`. The set is closed per deployment but the
/// supervisor treats it as an opaque string key.
pub type Permission = String;

/// The level a policy assigns to a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyLevel {
    AutoApprove,
    NotifyThenDo,
    RequireApproval,
    AlwaysDeny,
}

impl std::fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AutoApprove => "auto-approve",
            Self::NotifyThenDo => "notify-then-do",
            Self::RequireApproval => "require-approval",
            Self::AlwaysDeny => "always-deny",
        };
        f.write_str(s)
    }
}
