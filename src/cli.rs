// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// The runtime binary: wiring only (spec §1 — entry points, config file
/// parsing, and logging plumbing are explicitly out of scope for the core).
#[derive(Parser, Debug)]
#[command(
    name = "sven",
    about = "An autonomous event-driven agent runtime",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Default)]
pub enum Commands {
    /// Start the dispatcher: sources, agents, and the worker pool. Runs
    /// until interrupted (Ctrl+C / SIGTERM).
    #[default]
    Run,
    /// Print the effective merged configuration and exit.
    ShowConfig,
}
