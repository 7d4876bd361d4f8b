// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.
//!
//! Vendor-specific entries are out of scope for this workspace (spec §1:
//! "concrete integrations with specific third-party model-provider client
//! libraries" are external collaborators).  The catalog retains its generic
//! shape — any embedder can extend it — but ships only the entry the mock
//! driver advertises, so `ModelProvider::catalog_*` default methods degrade
//! gracefully instead of requiring a live vendor lookup.

use serde::{Deserialize, Serialize};

/// Input modalities supported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

fn default_input_modalities() -> Vec<InputModality> {
    vec![InputModality::Text]
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "mock-1").
    pub id: String,
    pub name: String,
    /// Provider identifier, e.g. "mock".
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_modalities")]
    pub input_modalities: Vec<InputModality>,
}

impl ModelCatalogEntry {
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    vec![ModelCatalogEntry {
        id: "mock-1".into(),
        name: "Mock Model".into(),
        provider: "mock".into(),
        context_window: 128_000,
        max_output_tokens: 4096,
        description: "Deterministic test double; no network calls.".into(),
        input_modalities: vec![InputModality::Text, InputModality::Image],
    }]
}

/// Look up a catalog entry by provider + model id.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}
