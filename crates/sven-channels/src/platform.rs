// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One inbound message as seen by the chat bridge, platform-agnostic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub platform: String,
    pub user: String,
    pub channel: String,
    pub thread: Option<String>,
    pub text: String,
    pub message_id: String,
    pub is_bot: bool,
}

/// A prior message in a thread, as returned by [`ChatPlatform::thread_history`].
#[derive(Debug, Clone)]
pub struct ThreadHistoryEntry {
    pub user: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A handle to a message the bridge posted, so it can be edited later
/// (edit-coalescing streaming, spec §4.9 step 7).
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    pub message_id: String,
    pub channel: String,
    pub thread: Option<String>,
}

/// The post/edit/react/thread-history surface a concrete chat integration
/// (Telegram, Discord, ...) must implement. Concrete wiring is out of scope
/// here; the bridge is written against this trait so it is testable with a
/// fake.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Post a new message, returning a handle for later edits.
    async fn post(&self, channel: &str, thread: Option<&str>, text: &str) -> anyhow::Result<OutboundHandle>;

    /// Edit a previously posted message in place.
    async fn edit(&self, handle: &OutboundHandle, text: &str) -> anyhow::Result<()>;

    /// Add a reaction to the originating message.
    async fn react(&self, channel: &str, message_id: &str, emoji: &str) -> anyhow::Result<()>;

    /// Remove a reaction previously added with [`react`](Self::react).
    async fn remove_reaction(&self, channel: &str, message_id: &str, emoji: &str) -> anyhow::Result<()>;

    /// Whether this platform can fetch prior thread messages at all.
    fn supports_thread_history(&self) -> bool {
        true
    }

    /// Fetch up to `limit` prior messages in a thread, newest last.
    async fn thread_history(
        &self,
        channel: &str,
        thread: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ThreadHistoryEntry>>;
}
