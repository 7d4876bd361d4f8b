// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One configured ticker entry: `{name, interval, spec}` per spec §4.1.
///
/// Exactly one of `interval` / `cron` drives the schedule. When both are
/// set, `cron` wins (it is the more expressive of the two). When neither
/// parses, job construction fails — this is a startup/config error, not a
/// runtime one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerJob {
    pub name: String,
    /// A `humantime`-parseable interval string, e.g. `"5m"`, `"1h"`.
    #[serde(default)]
    pub interval: Option<String>,
    /// A standard five-field cron expression, e.g. `"0 */15 * * * *"`.
    #[serde(default)]
    pub cron: Option<String>,
}

impl TickerJob {
    pub fn interval_job(name: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: Some(interval.into()),
            cron: None,
        }
    }

    pub fn cron_job(name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: None,
            cron: Some(cron.into()),
        }
    }

    pub(crate) fn parsed_interval(&self) -> anyhow::Result<Duration> {
        let raw = self
            .interval
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("job {:?} has no interval configured", self.name))?;
        Ok(humantime::parse_duration(raw)?)
    }

    pub(crate) fn parsed_schedule(&self) -> anyhow::Result<cron::Schedule> {
        use std::str::FromStr;
        let raw = self
            .cron
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("job {:?} has no cron spec configured", self.name))?;
        Ok(cron::Schedule::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_job_parses() {
        let job = TickerJob::interval_job("heartbeat", "30s");
        assert_eq!(job.parsed_interval().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn cron_job_parses() {
        let job = TickerJob::cron_job("nightly", "0 0 3 * * *");
        assert!(job.parsed_schedule().is_ok());
    }

    #[test]
    fn job_with_neither_field_fails_to_parse_either_way() {
        let job = TickerJob {
            name: "broken".into(),
            interval: None,
            cron: None,
        };
        assert!(job.parsed_interval().is_err());
        assert!(job.parsed_schedule().is_err());
    }
}
