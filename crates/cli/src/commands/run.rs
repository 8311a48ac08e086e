use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use offload_dispatch::{DispatchConfig, DispatchEvent, Dispatcher, ResultSink, ThreadBackend};
use tracing::{info, warn};

use crate::cli::WorkloadArgs;
use crate::report::RunReport;

pub async fn execute(config: DispatchConfig, args: WorkloadArgs, json: bool) -> Result<()> {
    let jobs = super::load_jobs(&args)?;
    if jobs.is_empty() {
        warn!(dir = %args.dir.display(), "no matching files");
    }
    let labels: Vec<String> = jobs.iter().map(|j| j.label.clone()).collect();
    let capacity = config.resolved_capacity();

    let backend = ThreadBackend::new(super::processor(&args)?);
    let mut dispatcher = Dispatcher::new(config, backend).context("invalid dispatcher config")?;
    let mut events = dispatcher.observe();
    let mut sink = ResultSink::new();

    let mut progress = sink.subscribe();
    let progress_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            if p.total > 0 {
                info!(completed = p.completed, total = p.total, "progress");
            }
        }
    });
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DispatchEvent::UnitEvicted { unit } => warn!(unit = %unit, "unit replaced"),
                DispatchEvent::Retried { job } => info!(job = %job, "retrying"),
                _ => {}
            }
        }
    });

    let started = Instant::now();
    let ids = dispatcher
        .submit(jobs, &mut sink)
        .context("could not start any execution unit")?;
    dispatcher.shutdown(&mut sink).await;
    let elapsed = started.elapsed();

    let labels: HashMap<_, _> = ids.into_iter().zip(labels).collect();
    let report = RunReport::build(
        dispatcher.session_id().to_string(),
        capacity,
        &labels,
        &sink,
        dispatcher.metrics(),
        elapsed,
    );

    drop(dispatcher);
    drop(sink);
    let _ = progress_task.await;
    let _ = event_task.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}
