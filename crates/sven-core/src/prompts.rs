// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::identity::AgentIdentity;

/// Build the system prompt seeded by an agent's identity.
///
/// Content is deliberately minimal: persona and capability text are owned
/// by configuration, not by this crate.
pub fn system_prompt(identity: &AgentIdentity) -> String {
    let mut sections = vec![format!(
        "You are {}, a {} agent.",
        identity.name, identity.role
    )];

    if !identity.description.is_empty() {
        sections.push(identity.description.clone());
    }
    if !identity.persona.is_empty() {
        sections.push(identity.persona.clone());
    }
    if !identity.capabilities.is_empty() {
        sections.push(format!(
            "Capabilities: {}.",
            identity.capabilities.join(", ")
        ));
    }

    sections.join("\n\n")
}
