// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Error kinds surfaced by the gateway client, per spec §7: transport and
/// handshake failures are retriable (the caller sees a readable banner),
/// timeouts/cancellation propagate verbatim and are never retried here.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("gateway handshake failed: {0}")]
    Handshake(String),
    #[error("gateway handshake timed out")]
    HandshakeTimeout,
    #[error("gateway connection lost")]
    Disconnected,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("server reported an error: {0}")]
    Remote(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("chat turn aborted")]
    Aborted,
    #[error("client is shutting down")]
    Closed,
}
