// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sven_runtime::{Event, EventSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BACKOFF: Duration = Duration::from_secs(5);

/// One item returned by a long-poll fetch. Non-message updates (e.g. edited
/// messages, reactions) still carry an `update_id` so the offset advances,
/// but `text`/`user` are `None` and no event is emitted for them.
#[derive(Debug, Clone)]
pub struct LongPollUpdate {
    pub update_id: i64,
    pub channel: String,
    pub user: Option<String>,
    pub text: Option<String>,
}

/// The transport a [`LongPollSource`] polls. Abstracted so the source is
/// testable without a live chat backend (concrete Telegram/Discord wiring is
/// out of scope).
#[async_trait]
pub trait LongPollTransport: Send + Sync {
    /// Fetch updates with `update_id >= offset`, waiting up to the
    /// transport's own server-side timeout for at least one to arrive.
    async fn fetch(&self, offset: i64) -> anyhow::Result<Vec<LongPollUpdate>>;
}

/// The long-poll text source (spec §4.1): advances `offset := max(offset,
/// update_id + 1)` per update, emitting at most one event per user-authored
/// message.
pub struct LongPollSource {
    name: String,
    transport: Arc<dyn LongPollTransport>,
    offset: Arc<AtomicI64>,
}

impl LongPollSource {
    pub fn new(name: impl Into<String>, transport: Box<dyn LongPollTransport>) -> Self {
        Self {
            name: name.into(),
            transport: Arc::from(transport),
            offset: Arc::new(AtomicI64::new(0)),
        }
    }
}

#[async_trait]
impl EventSource for LongPollSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        cancellation: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> anyhow::Result<()> {
        // Must return promptly per the `EventSource` contract; the poll loop
        // itself runs in a background task bound to `cancellation`.
        let name = self.name.clone();
        let offset = Arc::clone(&self.offset);
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            poll_loop(name, transport, offset, cancellation, out).await;
        });
        Ok(())
    }
}

async fn poll_loop(
    name: String,
    transport: Arc<dyn LongPollTransport>,
    offset: Arc<AtomicI64>,
    cancellation: CancellationToken,
    out: mpsc::Sender<Event>,
) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }

        let current_offset = offset.load(Ordering::SeqCst);
        let updates = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return,
            result = transport.fetch(current_offset) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(source = %name, error = %e, "long-poll fetch failed, backing off");
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return,
                    _ = tokio::time::sleep(BACKOFF) => {}
                }
                continue;
            }
        };

        for update in updates {
            let next = update.update_id + 1;
            offset.fetch_max(next, Ordering::SeqCst);

            let (Some(text), Some(user)) = (update.text.as_ref(), update.user.as_ref()) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }

            let event = Event::new(
                name.clone(),
                "message",
                serde_json::json!({"text": text, "user": user, "channel": update.channel}),
            )
            .with_metadata("channel", update.channel.clone())
            .with_metadata("user", user.clone());

            if out.send(event).await.is_err() {
                debug!(source = %name, "event channel closed, stopping long-poll loop");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedTransport {
        batches: Mutex<Vec<Vec<LongPollUpdate>>>,
    }

    #[async_trait]
    impl LongPollTransport for ScriptedTransport {
        async fn fetch(&self, _offset: i64) -> anyhow::Result<Vec<LongPollUpdate>> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            Ok(batches.remove(0))
        }
    }

    #[tokio::test]
    async fn emits_one_event_per_user_message_and_skips_non_messages() {
        let transport = ScriptedTransport {
            batches: Mutex::new(vec![vec![
                LongPollUpdate {
                    update_id: 1,
                    channel: "c1".into(),
                    user: Some("alice".into()),
                    text: Some("hello".into()),
                },
                LongPollUpdate {
                    update_id: 2,
                    channel: "c1".into(),
                    user: None,
                    text: None,
                },
            ]]),
        };
        let source = LongPollSource::new("longpoll", Box::new(transport));
        let (tx, mut rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();

        let event = tokio::time::timeout(Duration::from_secs(1), async {
            source.subscribe(cancellation.clone(), tx).await.unwrap();
        });
        let recv = tokio::time::timeout(Duration::from_millis(200), rx.recv());
        let (_, received) = tokio::join!(event, recv);
        cancellation.cancel();

        let event = received.unwrap().expect("one event emitted");
        assert_eq!(event.payload["text"], "hello");
    }

    #[tokio::test]
    async fn cancellation_stops_the_poll_loop() {
        struct NeverReturns;
        #[async_trait]
        impl LongPollTransport for NeverReturns {
            async fn fetch(&self, _offset: i64) -> anyhow::Result<Vec<LongPollUpdate>> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }

        let source = LongPollSource::new("longpoll", Box::new(NeverReturns));
        let (tx, _rx) = mpsc::channel(8);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), source.subscribe(cancellation, tx)).await;
        assert!(result.is_ok(), "subscribe should return promptly once cancelled");
    }
}
