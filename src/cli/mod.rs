//! Command-line interface: experiment administration and offline tools.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Levers: multi-armed bandit experimentation runtime.
#[derive(Debug, Parser)]
#[command(name = "levers", version, about)]
pub struct Cli {
    /// Path to a config file (defaults to .levers/config.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Experiment lifecycle and administration.
    #[command(subcommand)]
    Experiment(ExperimentCommands),

    /// Offline replay tools.
    #[command(subcommand)]
    Replay(ReplayCommands),

    /// Run the background workers (attribution sweeper, state updater,
    /// guardrail monitor, decision engine).
    Run,
}

#[derive(Debug, Subcommand)]
pub enum ExperimentCommands {
    /// Create an experiment from a spec file (YAML or JSON).
    Create { spec: PathBuf },
    /// Start a draft experiment (seeds priors, admits traffic).
    Start { id: Uuid },
    /// Pause an active experiment.
    Pause { id: Uuid },
    /// Resume a paused experiment.
    Resume { id: Uuid },
    /// End an experiment normally.
    End { id: Uuid },
    /// Kill an experiment immediately.
    Kill {
        id: Uuid,
        /// Reason recorded on the terminal decision.
        #[arg(long, default_value = "manual kill")]
        reason: String,
    },
    /// Grow the traffic fraction.
    Ramp { id: Uuid, fraction: f64 },
    /// Change the assignment salt (resets assignments).
    SetSalt { id: Uuid, salt: String },
    /// List experiments.
    List,
    /// Show per-policy summary of an experiment.
    Summary { id: Uuid },
    /// Show recent guardrail checks.
    Guardrails { id: Uuid },
    /// Export serve events as csv or jsonl.
    Export {
        id: Uuid,
        #[arg(long, default_value = "jsonl")]
        format: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReplayCommands {
    /// Append historical serve+reward records (JSONL) to the replay store.
    LoadLogs { path: PathBuf },
    /// Select the densest contiguous window of at least the given length.
    SelectWindow {
        #[arg(long, default_value_t = 14)]
        min_days: i64,
    },
    /// Replay a policy config over the selected window.
    Run {
        /// JSON file with the policy params (tagged by kind).
        policy: PathBuf,
        /// Label used in the report.
        #[arg(long, default_value = "candidate")]
        label: String,
        #[arg(long, default_value_t = 14)]
        min_days: i64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}
