// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The gateway client (spec §4.8): a persistent duplex connection to a
//! remote agent runtime, framed as JSON request/response/event messages,
//! with a challenge-response handshake, exponential-backoff reconnect, and
//! non-blocking chat-event delivery.

mod client;
mod device;
mod error;
mod frame;

pub use client::{ChatSendOutcome, GatewayClient, GatewayClientConfig};
pub use device::DeviceIdentity;
pub use error::GatewayError;
pub use frame::{
    ChatEventPayload, ChatMessage, ChatState, ConnectChallenge, ContentPart, Frame,
};
