// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sven_runtime::{Event, EventSource};

use crate::job::TickerJob;

/// For each configured job, a background task emits a tick event every
/// `interval` (or on the next match of a `cron` schedule); the event
/// carries the job name and UTC timestamp in metadata. Cancellation stops
/// all jobs.
pub struct TickerSource {
    jobs: Vec<TickerJob>,
}

impl TickerSource {
    pub fn new(jobs: Vec<TickerJob>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl EventSource for TickerSource {
    fn name(&self) -> &str {
        "cron"
    }

    async fn subscribe(
        &self,
        cancellation: CancellationToken,
        out: mpsc::Sender<Event>,
    ) -> anyhow::Result<()> {
        for job in &self.jobs {
            let job = job.clone();
            let out = out.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                if let Err(e) = run_job(job, cancellation, out).await {
                    warn!(error = %e, "ticker job exited");
                }
            });
        }
        Ok(())
    }
}

async fn run_job(
    job: TickerJob,
    cancellation: CancellationToken,
    out: mpsc::Sender<Event>,
) -> anyhow::Result<()> {
    if job.cron.is_some() {
        run_cron_job(job, cancellation, out).await
    } else {
        run_interval_job(job, cancellation, out).await
    }
}

async fn run_interval_job(
    job: TickerJob,
    cancellation: CancellationToken,
    out: mpsc::Sender<Event>,
) -> anyhow::Result<()> {
    let period = job.parsed_interval()?;
    let mut ticker = interval(period);
    // The first tick fires immediately; skip it so jobs don't fire the
    // instant the runtime starts.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Ok(()),
            _ = ticker.tick() => emit_tick(&job, &out).await,
        }
    }
}

async fn run_cron_job(
    job: TickerJob,
    cancellation: CancellationToken,
    out: mpsc::Sender<Event>,
) -> anyhow::Result<()> {
    let schedule: Schedule = job.parsed_schedule()?;

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            return Ok(());
        };
        let delay = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Ok(()),
            _ = sleep(delay) => emit_tick(&job, &out).await,
        }
    }
}

async fn emit_tick(job: &TickerJob, out: &mpsc::Sender<Event>) {
    let event = Event::new("cron", "tick", serde_json::json!({ "job": job.name }))
        .with_metadata("job", job.name.clone())
        .with_metadata("timestamp", Utc::now().to_rfc3339());

    if out.send(event).await.is_err() {
        info!(job = %job.name, "ticker event channel closed, stopping job");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn interval_job_emits_tick_with_job_name_and_timestamp() {
        let (tx, mut rx) = mpsc::channel(4);
        let source = TickerSource::new(vec![TickerJob::interval_job("heartbeat", "10ms")]);
        let cancel = CancellationToken::new();

        source.subscribe(cancel.clone(), tx).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("tick did not arrive in time")
            .expect("channel closed early");

        assert_eq!(event.source, "cron");
        assert_eq!(event.kind, "tick");
        assert_eq!(event.metadata.get("job").map(String::as_str), Some("heartbeat"));
        assert!(event.metadata.contains_key("timestamp"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_emitting_further_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let source = TickerSource::new(vec![TickerJob::interval_job("fast", "5ms")]);
        let cancel = CancellationToken::new();

        source.subscribe(cancel.clone(), tx).await.unwrap();
        // Drain at least one tick so we know the job is running.
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Drain anything already queued, then expect no further sends once
        // the sender side has had time to observe cancellation.
        while rx.try_recv().is_ok() {}
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "job kept ticking after cancellation");
    }

    #[tokio::test]
    async fn multiple_jobs_run_independently() {
        let (tx, mut rx) = mpsc::channel(8);
        let source = TickerSource::new(vec![
            TickerJob::interval_job("a", "5ms"),
            TickerJob::interval_job("b", "5ms"),
        ]);
        let cancel = CancellationToken::new();
        source.subscribe(cancel.clone(), tx).await.unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.insert(event.metadata.get("job").cloned().unwrap());
        }
        cancel.cancel();
        assert!(seen.contains("a") || seen.contains("b"));
    }
}
