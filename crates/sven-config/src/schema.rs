// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the runtime.  Assembled by [`crate::load`] from a
/// layered YAML search path, then overridden field-by-field from environment
/// variables (see [`crate::loader::apply_env_overrides`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Statically configured agent identities.  Agents may also be
    /// registered programmatically by the binary that embeds this crate.
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    /// Named provider configurations, selectable by key from `agents[].model`.
    #[serde(default)]
    pub providers: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier.  Only `"mock"` ships a concrete driver in this
    /// workspace — real vendor client libraries are out of scope (spec §1);
    /// any other value is accepted but `sven_model::from_config` will only
    /// succeed for drivers actually registered at runtime.
    pub provider: String,
    /// Model name forwarded to the provider.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Path to a YAML scripted-response file (used when provider = "mock").
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-1".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            mock_responses_file: None,
        }
    }
}

/// The closed set of roles an [`AgentDef`] (and the runtime `AgentIdentity`
/// it seeds) may take, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Executor,
    Reviewer,
    Orchestrator,
    General,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Planner => write!(f, "planner"),
            AgentRole::Executor => write!(f, "executor"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::Orchestrator => write!(f, "orchestrator"),
            AgentRole::General => write!(f, "general"),
        }
    }
}

/// What memory an agent may read/write, per spec §3 `memory-scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Only its own tagged entries.
    Own,
    /// All entries in the store.
    Shared,
    /// No memory retrieval or persistence.
    #[default]
    None,
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

/// Statically declared agent, loaded from YAML and turned into a runtime
/// `AgentIdentity` + registered `Agent` by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub memory_scope: MemoryScope,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    /// Key into `providers`, or empty to use the top-level `model` config.
    #[serde(default)]
    pub model: String,
    /// System-prompt override for this agent; falls back to the runtime
    /// default prompt when unset.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_event_channel_capacity() -> usize {
    256
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_tool_iter() -> u32 {
    10
}
fn default_webhook_addr() -> String {
    "0.0.0.0:8088".into()
}
fn default_webhook_path() -> String {
    "/webhook".into()
}
fn default_db_path() -> String {
    "sven.db".into()
}

/// Ambient runtime configuration: env vars from spec §6 (model id, db path,
/// gateway url, device credential paths, admin user list, channel allowlist,
/// supervisor channel, namespace list, webhook address/path/secret).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the persistent store's single sqlite file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Gateway (remote agent runtime) websocket URL, e.g. `wss://host/ws`.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Bearer token sent in the connect handshake, when configured.
    #[serde(default)]
    pub gateway_token: Option<String>,
    /// Device identity id, paired with `device_key_path`, for Ed25519
    /// connect-request signing (spec §4.8).
    #[serde(default)]
    pub device_id: Option<String>,
    /// PEM-encoded Ed25519 private key path.
    #[serde(default)]
    pub device_key_path: Option<PathBuf>,
    /// User ids allowed to change policy.  Empty means "everyone is admin"
    /// (spec §4.5 bootstrap convenience).
    #[serde(default)]
    pub admin_users: Vec<String>,
    /// Chat channels the bridge will accept inbound events from; empty means
    /// all channels are allowed.
    #[serde(default)]
    pub channel_allowlist: Vec<String>,
    /// Channel approval prompts are posted to.
    #[serde(default)]
    pub supervisor_channel: Option<String>,
    /// Default namespaces available to task executors (resource scoping for
    /// collaborators such as cluster/issue clients); out-of-scope collaborator
    /// concern, carried here only as a config surface.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// HTTP ingress bind address.
    #[serde(default = "default_webhook_addr")]
    pub webhook_addr: String,
    /// HTTP ingress path.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Shared secret checked against `X-Webhook-Secret`; `None` disables the
    /// check (fail-open only when explicitly unset).
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Bounded event channel capacity (spec §4.4, default 256).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Worker-pool semaphore capacity (spec §4.4, default 4).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Agent turn-loop tool-iteration ceiling (spec §4.3, default 10).
    #[serde(default = "default_max_tool_iter")]
    pub max_tool_iter: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(default_db_path()),
            gateway_url: None,
            gateway_token: None,
            device_id: None,
            device_key_path: None,
            admin_users: Vec::new(),
            channel_allowlist: Vec::new(),
            supervisor_channel: None,
            namespaces: Vec::new(),
            webhook_addr: default_webhook_addr(),
            webhook_path: default_webhook_path(),
            webhook_secret: None,
            event_channel_capacity: default_event_channel_capacity(),
            max_concurrency: default_max_concurrency(),
            max_tool_iter: default_max_tool_iter(),
        }
    }
}
