// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chat-platform integration: an event source that long-polls a platform's
//! update feed, and a bridge that turns inbound chat messages into gateway
//! chat turns with streaming replies and persistent thread state.

mod bridge;
mod longpoll;
mod markdown;
mod platform;
mod session;
mod splitter;
mod thread_tracker;
mod token_limit;

pub use bridge::{ChatBridge, ChatBridgeConfig};
pub use longpoll::{LongPollSource, LongPollTransport, LongPollUpdate};
pub use platform::{ChatPlatform, InboundMessage, OutboundHandle, ThreadHistoryEntry};
pub use session::derive_session_key;
pub use splitter::split_for_posting;
pub use thread_tracker::{ThreadTracker, ThreadTrackerStore};
pub use token_limit::is_context_length_error;
