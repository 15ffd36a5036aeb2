use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Admission control and recovery for a shared accelerator.
///
/// Runs against an in-process simulated device, so the whole
/// scheduler / resource / cache / recovery loop can be exercised without
/// hardware.
#[derive(Parser, Debug)]
#[command(name = "accelctl", about = "Admission control and recovery for a shared accelerator")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(long, env = "ACCEL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a synthetic workload and print metrics as JSON
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of tasks to submit
    #[arg(long, default_value = "32")]
    pub tasks: usize,

    /// Make every K-th task fail with an out-of-memory error
    #[arg(long)]
    pub oom_every: Option<usize>,

    /// How long each task's handler works, in milliseconds
    #[arg(long, default_value = "50")]
    pub task_ms: u64,

    /// Give up waiting for the workload to drain after this many seconds
    #[arg(long, default_value = "120")]
    pub timeout_secs: u64,
}
