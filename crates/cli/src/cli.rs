use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Offload CPU-heavy file processing to a bounded pool of worker threads.
#[derive(Parser, Debug)]
#[command(name = "offload", about = "Bounded worker-pool job dispatcher")]
pub struct CliArgs {
    /// Path to the dispatcher config file
    #[arg(long, env = "OFFLOAD_CONFIG", default_value = "offload.toml")]
    pub config: PathBuf,

    /// Override pool capacity (0 = available parallelism)
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Override the per-job timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render thumbnails for every matching file under a directory
    Run {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Print a JSON report instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Run the batch inline and offloaded, and compare responsiveness
    Compare {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Heartbeat period on the dispatching thread
        #[arg(long, default_value = "10")]
        heartbeat_ms: u64,

        /// Print a JSON report instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Directory to scan
    pub dir: PathBuf,

    /// Comma-separated file extensions to include (empty = all files)
    #[arg(
        long,
        env = "OFFLOAD_EXTENSIONS",
        default_value = "png,jpg,jpeg,raw",
        value_delimiter = ','
    )]
    pub ext: Vec<String>,

    /// Maximum recursion depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Longest thumbnail edge in pixels
    #[arg(long, default_value = "64")]
    pub max_edge: u32,

    /// SHA-256 rounds burned per thumbnail
    #[arg(long, env = "OFFLOAD_ROUNDS", default_value = "20000")]
    pub rounds: u32,
}
