// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{info_span, warn, Instrument};

use sven_memory::{MemoryEntry, MemoryStore};
use sven_model::{
    CompletionRequest, FunctionCall, Message, MessageContent, ModelProvider, ResponseEvent, Role,
};
use sven_runtime::{Event, EventHandler};
use sven_tools::{ToolCall, ToolRegistry};

use crate::{
    events::{AgentEvent, AgentStatus},
    identity::AgentIdentity,
    prompts::system_prompt,
    session::Session,
};

/// Default ceiling on tool-use iterations within a single turn.
pub const DEFAULT_MAX_TOOL_ITER: u32 = 10;

/// Number of relevant memories prepended to the user message.
const MEMORY_CONTEXT_LIMIT: usize = 5;

/// The result of collecting one model completion into a single stop-reason.
enum StopReason {
    EndTurn(String),
    ToolUse(ToolCall),
    MaxTokens,
    /// Unknown/erroring stop reason; carries a human-readable message.
    Failed(String),
}

/// A persistent identity + policy that consumes events and produces side
/// effects via tools.
///
/// Handles exactly one event at a time: concurrent [`Agent::handle`] calls
/// for the same identity are not supported. The dispatcher enforces this by
/// construction (one `EventHandler` per registered agent id, never invoked
/// concurrently with itself).
pub struct Agent {
    identity: AgentIdentity,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    memory: Option<Arc<dyn MemoryStore>>,
    max_tool_iter: u32,
    status: Mutex<AgentStatus>,
    events: broadcast::Sender<AgentEvent>,
}

impl Agent {
    pub fn new(
        identity: AgentIdentity,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        memory: Option<Arc<dyn MemoryStore>>,
    ) -> Self {
        Self::with_max_tool_iter(identity, model, tools, memory, DEFAULT_MAX_TOOL_ITER)
    }

    pub fn with_max_tool_iter(
        identity: AgentIdentity,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        memory: Option<Arc<dyn MemoryStore>>,
        max_tool_iter: u32,
    ) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            identity,
            model,
            tools,
            memory,
            max_tool_iter,
            status: Mutex::new(AgentStatus::Idle),
            events,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Subscribe to this agent's turn events (status transitions, tool
    /// calls, final text). Dropped receivers are simply skipped on send.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.lock().await
    }

    fn emit(&self, event: AgentEvent) {
        // A broadcast send fails only when there are no receivers; that is
        // the common case when nobody is watching this agent's turn, so the
        // error is deliberately ignored rather than logged.
        let _ = self.events.send(event);
    }

    async fn set_status(&self, status: AgentStatus) {
        *self.status.lock().await = status;
        self.emit(AgentEvent::StatusChanged(status));
    }

    /// Run the turn loop for a single event to completion.
    pub async fn handle_event(&self, event: Event) -> anyhow::Result<()> {
        self.set_status(AgentStatus::Running).await;
        match self.run_turn(&event).await {
            Ok(final_text) => {
                self.emit(AgentEvent::TurnComplete(final_text));
                self.set_status(AgentStatus::Idle).await;
                Ok(())
            }
            Err(e) => {
                self.emit(AgentEvent::Error(e.to_string()));
                self.set_status(AgentStatus::Error).await;
                Err(e)
            }
        }
    }

    async fn run_turn(&self, event: &Event) -> anyhow::Result<String> {
        let mut session =
            Session::new(self.model.catalog_context_window().unwrap_or(128_000) as usize);

        let memories = self.fetch_relevant_memories(event).await;
        let user_message = build_user_message(event, &memories);
        session.push(Message::user(user_message));

        let system = system_prompt(&self.identity);
        let tool_schemas: Vec<sven_model::ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| sven_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        for iteration in 0..self.max_tool_iter {
            let mut messages = vec![Message::system(system.clone())];
            messages.extend(session.messages.iter().cloned());

            let req = CompletionRequest {
                messages,
                tools: tool_schemas.clone(),
                stream: true,
                system_dynamic_suffix: None,
            };

            let stop = self
                .complete(req)
                .instrument(info_span!("agent_turn", agent = %self.identity.id, iteration))
                .await?;

            match stop {
                StopReason::EndTurn(text) => {
                    self.persist_turn_memory(event, &text).await;
                    return Ok(text);
                }
                StopReason::ToolUse(call) => {
                    self.emit(AgentEvent::ToolCallStarted(call.clone()));
                    session.push(Message {
                        role: Role::Assistant,
                        content: MessageContent::ToolCall {
                            tool_call_id: call.id.clone(),
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.args.to_string(),
                            },
                        },
                    });

                    let output = self.tools.execute(&call).await;
                    self.emit(AgentEvent::ToolCallFinished {
                        call_id: output.call_id.clone(),
                        tool_name: call.name.clone(),
                        output: output.content.clone(),
                        is_error: output.is_error,
                    });

                    // The tool result is flagged as an error by prefixing the
                    // text the model sees; the wire-level Message type has no
                    // dedicated boolean, matching the shape sven-model ships.
                    let result_text = if output.is_error {
                        format!("Error: {}", output.content)
                    } else {
                        output.content.clone()
                    };
                    session.push(Message::tool_result(call.id.clone(), result_text));

                    self.persist_tool_memory(event, &call, &output.content).await;
                }
                StopReason::MaxTokens => {
                    anyhow::bail!("max-tokens reached");
                }
                StopReason::Failed(msg) => {
                    anyhow::bail!("{msg}");
                }
            }
        }

        anyhow::bail!("tool-iteration limit exceeded")
    }

    /// Drive one model completion to a single collected stop reason.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<StopReason> {
        let mut stream = self.model.complete(req).await?;

        let mut text = String::new();
        let mut tool_call: Option<(String, String, String)> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(ResponseEvent::TextDelta(delta)) => text.push_str(&delta),
                Ok(ResponseEvent::ThinkingDelta(_)) => {}
                Ok(ResponseEvent::ToolCall { id, name, arguments }) => {
                    tool_call = Some((id, name, arguments));
                }
                Ok(ResponseEvent::Usage { .. }) => {}
                Ok(ResponseEvent::Done) => {
                    return Ok(match tool_call {
                        Some((id, name, arguments)) => {
                            let args: serde_json::Value = serde_json::from_str(&arguments)
                                .unwrap_or(serde_json::Value::Null);
                            StopReason::ToolUse(ToolCall { id, name, args })
                        }
                        None => StopReason::EndTurn(text),
                    });
                }
                Ok(ResponseEvent::MaxTokens) => return Ok(StopReason::MaxTokens),
                Ok(ResponseEvent::Error(msg)) => return Ok(StopReason::Failed(msg)),
                Err(e) => return Ok(StopReason::Failed(e.to_string())),
            }
        }

        // Stream ended without an explicit Done/MaxTokens/Error — treat as
        // an unknown stop reason rather than silently succeeding.
        Ok(StopReason::Failed("stream ended without a stop reason".into()))
    }

    async fn fetch_relevant_memories(&self, event: &Event) -> Vec<MemoryEntry> {
        use sven_config::MemoryScope;

        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let scope = match self.identity.memory_scope {
            MemoryScope::Own => Some(self.identity.id.as_str()),
            MemoryScope::Shared => None,
            MemoryScope::None => return Vec::new(),
        };
        let query = event.payload.to_string();
        match memory.search(scope, &query, MEMORY_CONTEXT_LIMIT).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "memory search failed; continuing without context");
                Vec::new()
            }
        }
    }

    async fn persist_turn_memory(&self, event: &Event, text: &str) {
        self.save_memory(text.to_string(), vec![event.source.clone(), event.kind.clone()])
            .await;
    }

    async fn persist_tool_memory(&self, event: &Event, call: &ToolCall, output: &str) {
        const TRUNCATE_AT: usize = 500;
        let truncated: String = output.chars().take(TRUNCATE_AT).collect();
        let content = format!(
            "[tool {} called with {}] -> {}",
            call.name, call.args, truncated
        );
        self.save_memory(content, vec![event.source.clone(), event.kind.clone()])
            .await;
    }

    async fn save_memory(&self, content: String, tags: Vec<String>) {
        use sven_config::MemoryScope;
        let Some(memory) = &self.memory else { return };
        if matches!(self.identity.memory_scope, MemoryScope::None) {
            return;
        }
        let entry = MemoryEntry::new(self.identity.id.clone(), content, tags);
        if let Err(e) = memory.save(entry).await {
            warn!(error = %e, "failed to persist memory entry");
        }
    }
}

/// `"[Event: source=… type=… id=…]\n<payload>"`, optionally preceded by a
/// "relevant memories" block.
fn build_user_message(event: &Event, memories: &[MemoryEntry]) -> String {
    let mut out = String::new();
    if !memories.is_empty() {
        out.push_str("[Relevant memories]\n");
        for m in memories {
            out.push_str("- ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "[Event: source={} type={} id={}]\n{}",
        event.source, event.kind, event.id, event.payload
    ));
    out
}

#[async_trait]
impl EventHandler for Agent {
    fn agent_id(&self) -> &str {
        &self.identity.id
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        self.handle_event(event).await
    }
}
