// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "monad",
    version,
    about = "Local-first conversational assistant runtime"
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (MONAD_LOG controls the filter)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive chat on a session (the default command)
    Chat {
        /// Resume an existing session instead of creating one
        #[arg(long)]
        session: Option<String>,
    },
    /// List sessions
    Sessions {
        /// Include archived sessions
        #[arg(long)]
        all: bool,
    },
    /// Manage background jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Print the merged configuration
    ShowConfig,
}

#[derive(Debug, Subcommand)]
pub enum JobCommands {
    /// Enqueue a job for an agent
    Add {
        /// Agent to run the job
        #[arg(long, default_value = "general")]
        agent: String,
        #[arg(long)]
        title: String,
        /// Self-contained task description
        description: String,
        /// Higher priority runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// List jobs and their status
    List,
    /// Run the scheduler until interrupted
    Run,
}
