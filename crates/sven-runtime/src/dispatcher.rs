// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::event::{Event, EventHandler, EventSource};
use crate::router::{Router, RouterRule};

/// Owns the bounded event channel, the router, the registered agents, and
/// the worker pool. Grounded on the teacher's `ControlService` dispatch
/// loop (receive command → spawn task → release on completion), generalised
/// from a single-agent command queue to a multi-agent, multi-source router.
pub struct Dispatcher {
    capacity: usize,
    max_concurrency: usize,
    sources: Vec<Arc<dyn EventSource>>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    rules: Vec<RouterRule>,
}

impl Dispatcher {
    pub fn new(capacity: usize, max_concurrency: usize) -> Self {
        Self {
            // tokio::sync::mpsc::channel panics on capacity 0; clamp to 1 so a
            // misconfigured capacity still yields the intended "producers
            // block until a worker drains" backpressure rather than a panic.
            capacity: capacity.max(1),
            max_concurrency: max_concurrency.max(1),
            sources: Vec::new(),
            handlers: HashMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn register_source(&mut self, source: Arc<dyn EventSource>) {
        self.sources.push(source);
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .insert(handler.agent_id().to_string(), handler);
    }

    pub fn set_rules(&mut self, rules: Vec<RouterRule>) {
        self.rules = rules;
    }

    /// Start all sources, then loop: receive an event, route it, and spawn a
    /// bounded-concurrency task per matched agent. On cancellation, stop
    /// receiving new events and wait for all in-flight tasks to complete.
    pub async fn run(&self, cancellation: CancellationToken) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(self.capacity);

        for source in &self.sources {
            source.subscribe(cancellation.clone(), tx.clone()).await?;
        }
        // Drop our own sender so the channel closes once every source's
        // clone has been dropped (all sources finished or were cancelled).
        drop(tx);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let router = Router::new(self.rules.clone(), self.handlers.keys().cloned().collect());
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                maybe_event = rx.recv() => {
                    match maybe_event {
                        None => break,
                        Some(event) => self.dispatch_one(event, &router, &semaphore, &mut tasks).await,
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "agent handling task panicked");
            }
        }
        Ok(())
    }

    async fn dispatch_one(
        &self,
        event: Event,
        router: &Router,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) {
        for agent_id in router.route(&event) {
            let Some(handler) = self.handlers.get(&agent_id).cloned() else {
                warn!(agent = %agent_id, "router matched an unregistered agent id");
                continue;
            };
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // semaphore closed: shutting down
            };
            let ev = event.clone();
            tasks.spawn(async move {
                if let Err(e) = handler.handle(ev).await {
                    error!(agent = %handler.agent_id(), error = %e, "agent handle failed");
                }
                drop(permit);
            });
        }
    }
}
