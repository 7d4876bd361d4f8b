// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
mod types;
mod provider;
mod mock;

pub use catalog::{InputModality, ModelCatalogEntry};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::ModelProvider;
pub use types::*;

use anyhow::bail;
use sven_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Concrete vendor client libraries (OpenAI, Anthropic, ...) are out of scope
/// for this workspace (spec §1) — this crate ships only the deterministic
/// mock driver used by the turn loop's own test suite and by operators who
/// want to run the runtime without a live model endpoint.
///
/// When `max_tokens` is not set in config, the model's `max_output_tokens` is
/// resolved from the static catalog, falling back to the mock entry's 4096.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "mock" => Ok(Box::new(MockProvider)),
        other => bail!(
            "unknown model provider: {other:?}\n\
             Only \"mock\" ships a concrete driver in this workspace; \
             register additional `ModelProvider` implementations at the \
             call site and dispatch to them ahead of this fallback."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(provider: &str, model: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.into(),
            name: model.into(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn from_config_mock_succeeds() {
        let cfg = minimal_config("mock", "mock-1");
        assert!(from_config(&cfg).is_ok());
    }

    #[test]
    fn from_config_unknown_provider_returns_error() {
        let cfg = minimal_config("totally_unknown_provider_xyz", "some-model");
        let result = from_config(&cfg);
        assert!(result.is_err());
        let msg = result.err().unwrap().to_string();
        assert!(msg.contains("unknown model provider"));
    }
}
