// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sven_tools::ToolCall;

/// The agent's externally observable lifecycle state during `handle`.
///
/// Transitions are always `Idle -> Running -> {Idle | Error}`. Concurrent
/// `handle` invocations for a single identity are not supported; callers
/// (the dispatcher) must serialise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Running,
    Error,
}

/// Events emitted by the agent during a single turn. Consumers (the chat
/// bridge, logging) subscribe to these to drive user-visible output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Status transition, per the turn-loop contract.
    StatusChanged(AgentStatus),
    /// The model has requested a tool call.
    ToolCallStarted(ToolCall),
    /// A tool call finished.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The assistant's final text for this turn (the end-turn stop reason).
    TurnComplete(String),
    /// A terminal handle error: max-tokens reached, unknown stop reason, or
    /// the tool-iteration limit exceeded.
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_variants_are_distinct() {
        assert_ne!(AgentStatus::Idle, AgentStatus::Running);
        assert_ne!(AgentStatus::Running, AgentStatus::Error);
    }
}
