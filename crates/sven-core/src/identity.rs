// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sven_config::{AgentDef, AgentRole, MemoryScope};
use uuid::Uuid;

/// A persistent identity + policy that consumes events and produces side
/// effects via tools. Read-only after construction; identity seeds the
/// system prompt.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Stable id, distinct from any process-lifetime instance id.
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub description: String,
    pub persona: String,
    pub capabilities: Vec<String>,
    pub memory_scope: MemoryScope,
    pub max_concurrent_tasks: u32,
}

impl AgentIdentity {
    /// Build an identity from a statically configured agent definition.
    pub fn from_def(def: &AgentDef) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            role: def.role,
            description: def.description.clone(),
            persona: def.persona.clone(),
            capabilities: def.capabilities.clone(),
            memory_scope: def.memory_scope,
            max_concurrent_tasks: def.max_concurrent_tasks,
        }
    }

    /// Build an ad-hoc identity (e.g. for tests) with a fresh random id.
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            description: String::new(),
            persona: String::new(),
            capabilities: Vec::new(),
            memory_scope: MemoryScope::None,
            max_concurrent_tasks: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_def_copies_every_field() {
        let def = AgentDef {
            id: "a1".into(),
            name: "Planner One".into(),
            role: AgentRole::Planner,
            description: "plans things".into(),
            persona: "terse".into(),
            capabilities: vec!["scm.read".into()],
            memory_scope: MemoryScope::Shared,
            max_concurrent_tasks: 2,
            model: String::new(),
            system_prompt: None,
        };
        let identity = AgentIdentity::from_def(&def);
        assert_eq!(identity.id, "a1");
        assert_eq!(identity.role, AgentRole::Planner);
        assert_eq!(identity.memory_scope, MemoryScope::Shared);
        assert_eq!(identity.max_concurrent_tasks, 2);
    }

    #[test]
    fn new_generates_distinct_ids() {
        let a = AgentIdentity::new("a", AgentRole::General);
        let b = AgentIdentity::new("b", AgentRole::General);
        assert_ne!(a.id, b.id);
    }
}
