// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sven_node_client::GatewayClient;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use crate::markdown::translate_markdown;
use crate::platform::{ChatPlatform, InboundMessage, OutboundHandle};
use crate::session::derive_session_key;
use crate::splitter::split_for_posting;
use crate::thread_tracker::ThreadTracker;
use crate::token_limit::is_context_length_error;

const THINKING_EMOJI: &str = "thinking_face";
const TYPING_GLYPH: &str = " \u{258c}"; // a trailing "▌" caret while streaming
const UNAVAILABLE_BANNER: &str = "I'm temporarily unable to respond. Please try again shortly.";

#[derive(Debug, Clone)]
pub struct ChatBridgeConfig {
    /// Short platform tag used in session-key derivation, e.g. `"tg"`.
    pub session_prefix: String,
    /// User id of the bot itself, used to ignore its own messages.
    pub bot_user_id: String,
    /// A leading mention token to strip from inbound text, if present.
    pub mention_token: Option<String>,
    /// Concurrent inbound-message budget (spec default 5).
    pub max_concurrent: usize,
    pub history_limit: usize,
    pub history_message_cap: usize,
    pub history_block_cap: usize,
    pub edit_coalesce: Duration,
    pub split_max_len: usize,
    pub chunk_spacing: Duration,
    /// Auxiliary endpoint `{sessionId, channel, threadTs}` is POSTed to
    /// before the chat call; `None` skips registration entirely.
    pub session_context_endpoint: Option<String>,
}

impl Default for ChatBridgeConfig {
    fn default() -> Self {
        Self {
            session_prefix: "chat".into(),
            bot_user_id: String::new(),
            mention_token: None,
            max_concurrent: 5,
            history_limit: 20,
            history_message_cap: 500,
            history_block_cap: 4000,
            edit_coalesce: Duration::from_millis(1500),
            split_max_len: 3000,
            chunk_spacing: Duration::from_millis(300),
            session_context_endpoint: None,
        }
    }
}

/// Adapts chat-platform events to gateway chat turns (spec §4.9).
pub struct ChatBridge {
    config: ChatBridgeConfig,
    platform: Arc<dyn ChatPlatform>,
    gateway: Arc<GatewayClient>,
    threads: ThreadTracker,
    semaphore: Semaphore,
    warm_sessions: Mutex<HashSet<String>>,
    http: reqwest::Client,
}

impl ChatBridge {
    pub fn new(config: ChatBridgeConfig, platform: Arc<dyn ChatPlatform>, gateway: Arc<GatewayClient>, threads: ThreadTracker) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            config,
            platform,
            gateway,
            threads,
            semaphore: Semaphore::new(max_concurrent),
            warm_sessions: Mutex::new(HashSet::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Handle one inbound chat message end to end: thinking reaction,
    /// history injection, streaming reply, final post-processing.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        if msg.is_bot || msg.user == self.config.bot_user_id {
            return Ok(());
        }

        let text = self.strip_mention(&msg.text);
        let Some(text) = text else { return Ok(()) };
        if text.trim().is_empty() {
            return Ok(());
        }

        let Ok(_permit) = self.semaphore.try_acquire() else {
            warn!(channel = %msg.channel, "chat bridge at capacity, dropping inbound message");
            return Ok(());
        };

        let mut reaction = ReactionGuard::new(self.platform.clone(), msg.channel.clone(), msg.message_id.clone());

        let thread = msg.thread.as_deref();
        let session_key = derive_session_key(&self.config.session_prefix, &msg.channel, thread);

        let mut outgoing = String::new();
        if let Some(thread_id) = thread {
            if self.platform.supports_thread_history() && !self.is_warm(&session_key) {
                if let Ok(history) = self.platform.thread_history(&msg.channel, thread_id, self.config.history_limit).await {
                    if let Some(block) = self.format_history_block(&history) {
                        outgoing.push_str(&block);
                        outgoing.push_str("\n\n");
                    }
                }
                self.mark_warm(&session_key);
            }
        }
        outgoing.push_str(&format!(
            "[platform:{} user:{} channel:{} thread:{}] {}",
            self.platform.name(),
            msg.user,
            msg.channel,
            thread.unwrap_or("-"),
            text,
        ));

        self.register_session_context(&session_key, &msg.channel, thread).await;

        // The streaming callback below is synchronous (the gateway client
        // calls it inline), so posting/editing — both async — happen on a
        // dedicated task that owns the running `OutboundHandle` and drains
        // display strings off a channel. The callback only decides whether
        // an update is due and forwards it; it never awaits.
        let (display_tx, mut display_rx) = mpsc::unbounded_channel::<String>();
        let (handle_tx, handle_rx) = oneshot::channel::<Option<OutboundHandle>>();
        let platform = self.platform.clone();
        let channel = msg.channel.clone();
        let thread_owned = thread.map(str::to_string);
        tokio::spawn(async move {
            let mut handle: Option<OutboundHandle> = None;
            while let Some(display) = display_rx.recv().await {
                match &handle {
                    Some(existing) => {
                        let _ = platform.edit(existing, &display).await;
                    }
                    None => {
                        if let Ok(posted) = platform.post(&channel, thread_owned.as_deref(), &display).await {
                            handle = Some(posted);
                        }
                    }
                }
            }
            let _ = handle_tx.send(handle);
        });

        let last_edit = Mutex::new(Instant::now() - self.config.edit_coalesce);
        let coalesce = self.config.edit_coalesce;

        let result = self
            .gateway
            .send_chat(&session_key, &outgoing, |text, is_final| {
                if is_final || text == "NO_REPLY" || text == "HEARTBEAT_OK" || text.is_empty() {
                    return;
                }
                let mut last = last_edit.lock().unwrap();
                if last.elapsed() < coalesce {
                    return;
                }
                *last = Instant::now();
                drop(last);

                let display = format!("{text}{TYPING_GLYPH}");
                let _ = display_tx.send(display);
            })
            .await;

        // `send_chat` drops its `on_update` closure (and the `display_tx` it
        // captured) when it returns, closing the channel so the posting
        // task's loop exits and reports back the handle it ended up with.
        let stream_handle = handle_rx.await.unwrap_or(None);

        reaction.disarm_and_remove();

        match result {
            Ok(outcome) => {
                self.threads.mark_active(&msg.channel, thread.unwrap_or(""), &session_key).await;
                self.post_final(&msg.channel, thread, stream_handle, &outcome.text).await;
                Ok(())
            }
            Err(e) => {
                let banner = if is_context_length_error(&e.to_string()) {
                    "This conversation has grown too long for me to continue; starting fresh may help."
                } else {
                    UNAVAILABLE_BANNER
                };
                warn!(error = %e, channel = %msg.channel, "chat turn failed");
                let _ = self.platform.post(&msg.channel, thread, banner).await;
                Ok(())
            }
        }
    }

    fn strip_mention<'a>(&self, text: &'a str) -> Option<String> {
        let trimmed = text.trim();
        match &self.config.mention_token {
            Some(token) if trimmed.starts_with(token.as_str()) => {
                let remainder = trimmed[token.len()..].trim_start();
                if remainder.is_empty() {
                    None
                } else {
                    Some(remainder.to_string())
                }
            }
            _ => Some(trimmed.to_string()),
        }
    }

    fn is_warm(&self, session_key: &str) -> bool {
        self.warm_sessions.lock().unwrap().contains(session_key)
    }

    fn mark_warm(&self, session_key: &str) {
        self.warm_sessions.lock().unwrap().insert(session_key.to_string());
    }

    fn format_history_block(&self, history: &[crate::platform::ThreadHistoryEntry]) -> Option<String> {
        if history.is_empty() {
            return None;
        }
        let mut lines = Vec::new();
        let mut total = 0usize;
        for entry in history.iter().rev() {
            let mut text = entry.text.clone();
            if text.chars().count() > self.config.history_message_cap {
                text = text.chars().take(self.config.history_message_cap).collect();
            }
            let line = format!("{}: {}", entry.user, text);
            if total + line.chars().count() > self.config.history_block_cap {
                break;
            }
            total += line.chars().count();
            lines.push(line);
        }
        lines.reverse();
        if lines.is_empty() {
            return None;
        }
        Some(format!("[Thread History]\n{}", lines.join("\n")))
    }

    async fn register_session_context(&self, session_key: &str, channel: &str, thread: Option<&str>) {
        let Some(endpoint) = &self.config.session_context_endpoint else { return };
        let body = serde_json::json!({
            "sessionId": session_key,
            "channel": channel,
            "threadTs": thread,
        });
        let result = self
            .http
            .post(endpoint)
            .json(&body)
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "session-context registration failed, ignoring");
        }
    }

    async fn post_final(&self, channel: &str, thread: Option<&str>, existing: Option<OutboundHandle>, text: &str) {
        let translated = translate_markdown(text);
        let chunks = split_for_posting(&translated, self.config.split_max_len);
        let mut chunks = chunks.into_iter();

        let Some(first) = chunks.next() else { return };
        match existing {
            Some(handle) => {
                if self.platform.edit(&handle, &first).await.is_err() {
                    let _ = self.platform.post(channel, thread, &first).await;
                }
            }
            None => {
                let _ = self.platform.post(channel, thread, &first).await;
            }
        }

        for chunk in chunks {
            tokio::time::sleep(self.config.chunk_spacing).await;
            let _ = self.platform.post(channel, thread, &chunk).await;
        }
    }
}

/// Ensures the "thinking" reaction is removed on every exit path, including
/// early returns, by removing it on drop if it was never explicitly
/// disarmed first.
struct ReactionGuard {
    platform: Arc<dyn ChatPlatform>,
    channel: String,
    message_id: String,
    armed: bool,
}

impl ReactionGuard {
    fn new(platform: Arc<dyn ChatPlatform>, channel: String, message_id: String) -> Self {
        let platform_for_react = platform.clone();
        let channel_for_react = channel.clone();
        let message_id_for_react = message_id.clone();
        tokio::spawn(async move {
            let _ = platform_for_react.react(&channel_for_react, &message_id_for_react, THINKING_EMOJI).await;
        });
        Self {
            platform,
            channel,
            message_id,
            armed: true,
        }
    }

    fn disarm_and_remove(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let platform = self.platform.clone();
        let channel = self.channel.clone();
        let message_id = self.message_id.clone();
        tokio::spawn(async move {
            let _ = platform.remove_reaction(&channel, &message_id, THINKING_EMOJI).await;
        });
    }
}

impl Drop for ReactionGuard {
    fn drop(&mut self) {
        self.disarm_and_remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ThreadHistoryEntry;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    struct FakePlatform {
        posts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatPlatform for FakePlatform {
        fn name(&self) -> &str {
            "fake"
        }

        async fn post(&self, channel: &str, thread: Option<&str>, text: &str) -> anyhow::Result<OutboundHandle> {
            self.posts.lock().unwrap().push(text.to_string());
            Ok(OutboundHandle {
                message_id: "m1".into(),
                channel: channel.to_string(),
                thread: thread.map(str::to_string),
            })
        }

        async fn edit(&self, _handle: &OutboundHandle, text: &str) -> anyhow::Result<()> {
            self.posts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn react(&self, _channel: &str, _message_id: &str, _emoji: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remove_reaction(&self, _channel: &str, _message_id: &str, _emoji: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn thread_history(&self, _channel: &str, _thread: &str, _limit: usize) -> anyhow::Result<Vec<ThreadHistoryEntry>> {
            Ok(vec![ThreadHistoryEntry {
                user: "alice".into(),
                text: "earlier message".into(),
                timestamp: Utc::now(),
            }])
        }
    }

    fn bridge_with(platform: Arc<FakePlatform>) -> ChatBridge {
        let gateway = GatewayClient::new(Default::default(), None);
        ChatBridge::new(ChatBridgeConfig::default(), platform, gateway, ThreadTracker::new(None))
    }

    #[tokio::test]
    async fn history_block_respects_message_and_block_caps() {
        let platform = Arc::new(FakePlatform { posts: StdMutex::new(Vec::new()) });
        let bridge = bridge_with(platform);
        let long_text: String = "z".repeat(1000);
        let history = vec![ThreadHistoryEntry {
            user: "bob".into(),
            text: long_text,
            timestamp: Utc::now(),
        }];
        let block = bridge.format_history_block(&history).unwrap();
        assert!(block.starts_with("[Thread History]"));
        assert!(block.chars().count() <= bridge.config.history_block_cap + "[Thread History]\nbob: ".len());
    }

    #[test]
    fn mention_stripping_drops_empty_remainder() {
        let platform = Arc::new(FakePlatform { posts: StdMutex::new(Vec::new()) });
        let mut bridge = bridge_with(platform);
        bridge.config.mention_token = Some("@bot".into());
        assert_eq!(bridge.strip_mention("@bot"), None);
        assert_eq!(bridge.strip_mention("@bot hello"), Some("hello".into()));
        assert_eq!(bridge.strip_mention("no mention here"), Some("no mention here".into()));
    }
}
