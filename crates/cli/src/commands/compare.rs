use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use offload_dispatch::{
    DispatchConfig, Dispatcher, JobId, JobSpec, Payload, ProcessRequest, Processor, ResultSink,
    ThreadBackend,
};
use offload_workload::ThumbnailProcessor;
use tracing::info;

use crate::cli::WorkloadArgs;
use crate::heartbeat::Heartbeat;
use crate::report::{CompareReport, ModeReport};

pub async fn execute(
    config: DispatchConfig,
    args: WorkloadArgs,
    heartbeat_ms: u64,
    json: bool,
) -> Result<()> {
    let jobs = super::load_jobs(&args)?;
    let processor = Arc::new(super::processor(&args)?);
    let period = Duration::from_millis(heartbeat_ms.max(1));
    let capacity = config.resolved_capacity();

    info!(jobs = jobs.len(), "running inline on the dispatching thread");
    let blocking = run_blocking(&processor, &jobs, period).await;

    info!(jobs = jobs.len(), capacity, "running offloaded");
    let offloaded = run_offloaded(config, Arc::clone(&processor), jobs.clone(), period).await?;

    let report = CompareReport {
        jobs: jobs.len(),
        capacity,
        blocking,
        offloaded,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

/// Process every job on this thread, yielding to the heartbeat only between jobs.
async fn run_blocking(
    processor: &ThumbnailProcessor,
    jobs: &[JobSpec],
    period: Duration,
) -> ModeReport {
    let heartbeat = Heartbeat::start(period);
    tokio::task::yield_now().await;

    let started = Instant::now();
    let mut succeeded = 0;
    for (n, spec) in jobs.iter().enumerate() {
        if let Payload::Bytes(bytes) = &spec.payload {
            let request = ProcessRequest {
                id: JobId(n as u64 + 1),
                payload: bytes.clone(),
                label: spec.label.clone(),
                size_hint: spec.size_hint,
                metadata: spec.metadata.clone(),
            };
            if processor.process(&request).is_ok() {
                succeeded += 1;
            }
        }
        tokio::task::yield_now().await;
    }
    let elapsed = started.elapsed();

    ModeReport {
        elapsed,
        heartbeat: heartbeat.stop().await,
        succeeded,
    }
}

async fn run_offloaded(
    config: DispatchConfig,
    processor: Arc<ThumbnailProcessor>,
    jobs: Vec<JobSpec>,
    period: Duration,
) -> Result<ModeReport> {
    let heartbeat = Heartbeat::start(period);
    let mut dispatcher = Dispatcher::new(config, ThreadBackend::from_arc(processor))
        .context("invalid dispatcher config")?;
    let mut sink = ResultSink::new();

    let started = Instant::now();
    dispatcher
        .submit(jobs, &mut sink)
        .context("could not start any execution unit")?;
    dispatcher.run_until_complete(&mut sink).await;
    let elapsed = started.elapsed();
    dispatcher.shutdown(&mut sink).await;

    Ok(ModeReport {
        elapsed,
        heartbeat: heartbeat.stop().await,
        succeeded: sink.successes(),
    })
}
