// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three frame kinds of the duplex protocol (spec §4.8/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "req")]
    Request {
        id: Uuid,
        method: String,
        params: serde_json::Value,
    },
    #[serde(rename = "res")]
    Response {
        id: Uuid,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "event")]
    Event {
        event: String,
        payload: serde_json::Value,
    },
}

/// Payload of the `connect.challenge` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectChallenge {
    pub nonce: String,
    pub ts: i64,
}

/// Payload of the `chat` event, one per delta/final/error/aborted state.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEventPayload {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    pub state: ChatState,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Delta,
    Final,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ChatMessage {
    /// Concatenated text of every text-bearing content part, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}
