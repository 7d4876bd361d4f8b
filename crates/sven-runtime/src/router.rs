// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::event::Event;

/// One routing rule: an ordered, first-match predicate over an event's
/// `source`, `type`, and a single metadata-key prefix match.
///
/// Empty fields act as wildcards. A rule with an empty `agents` list
/// broadcasts to every registered agent; a non-empty list maps to those
/// agent ids (unknown ids are skipped with a logged warning by the caller).
#[derive(Debug, Clone, Default)]
pub struct RouterRule {
    pub source: Option<String>,
    pub event_type: Option<String>,
    /// `(metadata key, required value prefix)`.
    pub metadata_prefix: Option<(String, String)>,
    pub agents: Vec<String>,
}

impl RouterRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_metadata_prefix(mut self, key: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.metadata_prefix = Some((key.into(), prefix.into()));
        self
    }

    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(source) = &self.source {
            if source != &event.source {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if event_type != &event.kind {
                return false;
            }
        }
        if let Some((key, prefix)) = &self.metadata_prefix {
            match event.metadata.get(key) {
                Some(value) if value.starts_with(prefix.as_str()) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Ordered rule-based router. The first matching rule wins; if none match,
/// the event broadcasts to every known agent.
pub struct Router {
    rules: Vec<RouterRule>,
    known_agents: Vec<String>,
}

impl Router {
    pub fn new(rules: Vec<RouterRule>, known_agents: Vec<String>) -> Self {
        Self {
            rules,
            known_agents,
        }
    }

    /// Route an event to the agent ids that should handle it.
    ///
    /// Unknown agent ids named by a rule are dropped (the caller logs the
    /// warning; this method stays pure and side-effect free).
    pub fn route(&self, event: &Event) -> Vec<String> {
        for rule in &self.rules {
            if rule.matches(event) {
                if rule.agents.is_empty() {
                    return self.known_agents.clone();
                }
                return rule
                    .agents
                    .iter()
                    .filter(|id| self.known_agents.contains(id))
                    .cloned()
                    .collect();
            }
        }
        self.known_agents.clone()
    }

    /// Agent ids named by a matched rule but not present in `known_agents`,
    /// for callers that want to log a warning per spec §4.4.
    pub fn unknown_agents<'a>(&self, event: &Event, rule_agents: &'a [String]) -> Vec<&'a str> {
        let _ = event;
        rule_agents
            .iter()
            .filter(|id| !self.known_agents.contains(id))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str, kind: &str) -> Event {
        Event::new(source, kind, serde_json::json!({}))
    }

    #[test]
    fn router_precedence_first_match_wins() {
        let rules = vec![
            RouterRule::new()
                .with_source("chat")
                .with_type("message")
                .with_agents(vec!["A1".into()]),
            RouterRule::new()
                .with_type("message")
                .with_agents(vec!["A2".into()]),
        ];
        let router = Router::new(rules, vec!["A1".into(), "A2".into()]);

        assert_eq!(router.route(&event("chat", "message")), vec!["A1"]);
        assert_eq!(router.route(&event("ingress", "message")), vec!["A2"]);
    }

    #[test]
    fn no_match_broadcasts_to_all_known_agents() {
        let router = Router::new(vec![], vec!["A1".into(), "A2".into()]);
        let mut ids = router.route(&event("cron", "tick"));
        ids.sort();
        assert_eq!(ids, vec!["A1", "A2"]);
    }

    #[test]
    fn empty_agent_list_broadcasts() {
        let rules = vec![RouterRule::new().with_source("cron")];
        let router = Router::new(rules, vec!["A1".into(), "A2".into()]);
        let mut ids = router.route(&event("cron", "tick"));
        ids.sort();
        assert_eq!(ids, vec!["A1", "A2"]);
    }

    #[test]
    fn unknown_agent_ids_are_filtered_out() {
        let rules = vec![RouterRule::new()
            .with_source("chat")
            .with_agents(vec!["A1".into(), "ghost".into()])];
        let router = Router::new(rules, vec!["A1".into()]);
        assert_eq!(router.route(&event("chat", "message")), vec!["A1"]);
    }

    #[test]
    fn metadata_prefix_matches() {
        let rules = vec![RouterRule::new()
            .with_metadata_prefix("channel", "ops-")
            .with_agents(vec!["A1".into()])];
        let router = Router::new(rules, vec!["A1".into(), "A2".into()]);
        let e = event("chat", "message").with_metadata("channel", "ops-alerts");
        assert_eq!(router.route(&e), vec!["A1"]);

        let e2 = event("chat", "message").with_metadata("channel", "random");
        let mut ids = router.route(&e2);
        ids.sort();
        assert_eq!(ids, vec!["A1", "A2"]);
    }
}
