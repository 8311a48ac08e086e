pub mod compare;
pub mod run;

use anyhow::{Context, Result};
use offload_dispatch::JobSpec;
use offload_workload::{collect_jobs, SourceOptions, ThumbnailProcessor};

use crate::cli::WorkloadArgs;

/// Scan the directory named by `args` into jobs.
pub fn load_jobs(args: &WorkloadArgs) -> Result<Vec<JobSpec>> {
    let options = SourceOptions {
        max_depth: args.max_depth,
        ..SourceOptions::default()
    }
    .with_extensions(&args.ext);
    collect_jobs(&args.dir, &options)
        .with_context(|| format!("failed to scan {}", args.dir.display()))
}

pub fn processor(args: &WorkloadArgs) -> Result<ThumbnailProcessor> {
    ThumbnailProcessor::new(args.max_edge, args.rounds).context("invalid thumbnail settings")
}
