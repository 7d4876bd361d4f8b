// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/sven/config.yaml"));
    paths.push(PathBuf::from("/etc/sven/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/sven/config.yaml"));
        paths.push(home.join(".config/sven/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("sven/config.yaml"));
        paths.push(cfg.join("sven/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".sven/config.yaml"));
    paths.push(PathBuf::from(".sven/config.yml"));
    paths.push(PathBuf::from(".sven.yaml"));
    paths.push(PathBuf::from(".sven.yml"));
    paths.push(PathBuf::from("sven.yaml"));
    paths.push(PathBuf::from("sven.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Override individual fields from environment variables, per spec §6.
/// Env vars win over every YAML layer — this mirrors the teacher's
/// `clap(env)` convention of letting the shell have the last word.
fn apply_env_overrides(config: &mut Config) {
    use std::env;

    if let Ok(v) = env::var("SVEN_MODEL_PROVIDER") {
        config.model.provider = v;
    }
    if let Ok(v) = env::var("SVEN_MODEL_NAME") {
        config.model.name = v;
    }
    if let Ok(v) = env::var("SVEN_DB_PATH") {
        config.runtime.db_path = PathBuf::from(v);
    }
    if let Ok(v) = env::var("SVEN_GATEWAY_URL") {
        config.runtime.gateway_url = Some(v);
    }
    if let Ok(v) = env::var("SVEN_GATEWAY_TOKEN") {
        config.runtime.gateway_token = Some(v);
    }
    if let Ok(v) = env::var("SVEN_DEVICE_ID") {
        config.runtime.device_id = Some(v);
    }
    if let Ok(v) = env::var("SVEN_DEVICE_KEY_PATH") {
        config.runtime.device_key_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = env::var("SVEN_ADMIN_USERS") {
        config.runtime.admin_users = split_csv(&v);
    }
    if let Ok(v) = env::var("SVEN_CHANNEL_ALLOWLIST") {
        config.runtime.channel_allowlist = split_csv(&v);
    }
    if let Ok(v) = env::var("SVEN_SUPERVISOR_CHANNEL") {
        config.runtime.supervisor_channel = Some(v);
    }
    if let Ok(v) = env::var("SVEN_NAMESPACES") {
        config.runtime.namespaces = split_csv(&v);
    }
    if let Ok(v) = env::var("SVEN_WEBHOOK_ADDR") {
        config.runtime.webhook_addr = v;
    }
    if let Ok(v) = env::var("SVEN_WEBHOOK_PATH") {
        config.runtime.webhook_path = v;
    }
    if let Ok(v) = env::var("SVEN_WEBHOOK_SECRET") {
        config.runtime.webhook_secret = Some(v);
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
