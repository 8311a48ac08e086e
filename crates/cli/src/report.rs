//! Human and JSON renderings of batch results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use offload_dispatch::{DispatchMetrics, FailureKind, JobId, Outcome, ResultSink};
use serde::Serialize;

use crate::heartbeat::HeartbeatStats;

#[derive(Debug, Serialize)]
pub struct FailureLine {
    pub job: JobId,
    pub label: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub session: String,
    pub generated_at: DateTime<Utc>,
    pub capacity: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub failures: Vec<FailureLine>,
    pub metrics: DispatchMetrics,
}

impl RunReport {
    pub fn build(
        session: String,
        capacity: usize,
        labels: &HashMap<JobId, String>,
        sink: &ResultSink,
        metrics: &DispatchMetrics,
        elapsed: Duration,
    ) -> Self {
        let mut failures: Vec<FailureLine> = sink
            .outcomes()
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                Outcome::Failure(f) => Some(FailureLine {
                    job: *id,
                    label: labels.get(id).cloned().unwrap_or_default(),
                    kind: f.kind,
                    reason: f.reason.clone(),
                }),
                Outcome::Success(_) => None,
            })
            .collect();
        failures.sort_by_key(|f| f.job);

        let progress = sink.progress();
        Self {
            session,
            generated_at: Utc::now(),
            capacity,
            total: progress.total,
            succeeded: sink.successes(),
            failed: failures.len(),
            elapsed,
            failures,
            metrics: metrics.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{} jobs in {:.2}s on {} units: {} ok, {} failed\n",
            self.total,
            self.elapsed.as_secs_f64(),
            self.capacity,
            self.succeeded,
            self.failed
        );
        out.push_str(&format!(
            "  peak busy {}, spawned {}, evicted {}, retries {}, avg job {:.1}ms\n",
            self.metrics.peak_busy_units,
            self.metrics.units_spawned,
            self.metrics.units_evicted,
            self.metrics.retries,
            self.metrics.avg_job_duration.as_secs_f64() * 1000.0
        ));
        for f in &self.failures {
            out.push_str(&format!("  {} {} [{}] {}\n", f.job, f.label, f.kind, f.reason));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeReport {
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub heartbeat: HeartbeatStats,
    pub succeeded: usize,
}

#[derive(Debug, Serialize)]
pub struct CompareReport {
    pub jobs: usize,
    pub capacity: usize,
    pub blocking: ModeReport,
    pub offloaded: ModeReport,
}

impl CompareReport {
    pub fn render(&self) -> String {
        let row = |name: &str, m: &ModeReport| {
            format!(
                "{name:<10} {:>10.1} {:>14.1} {:>8} {:>6}\n",
                m.elapsed.as_secs_f64() * 1000.0,
                m.heartbeat.max_gap.as_secs_f64() * 1000.0,
                m.heartbeat.ticks,
                m.succeeded
            )
        };
        let mut out = format!("{} jobs, {} units\n", self.jobs, self.capacity);
        out.push_str(&format!(
            "{:<10} {:>10} {:>14} {:>8} {:>6}\n",
            "mode", "elapsed_ms", "max_gap_ms", "ticks", "ok"
        ));
        out.push_str(&row("blocking", &self.blocking));
        out.push_str(&row("offloaded", &self.offloaded));
        out
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_dispatch::{Artifact, Failure};

    fn sink() -> ResultSink {
        let mut sink = ResultSink::new();
        sink.register(JobId(1));
        sink.register(JobId(2));
        sink.record_success(JobId(1), Artifact::new(vec![1])).unwrap();
        sink.record_failure(JobId(2), Failure::new(FailureKind::Timeout, "no reply within 5s"))
            .unwrap();
        sink
    }

    #[test]
    fn run_report_lists_failures_with_labels() {
        let labels = HashMap::from([
            (JobId(1), "a.png".to_string()),
            (JobId(2), "b.png".to_string()),
        ]);
        let report = RunReport::build(
            "s".into(),
            4,
            &labels,
            &sink(),
            &DispatchMetrics::default(),
            Duration::from_millis(1500),
        );
        assert_eq!((report.total, report.succeeded, report.failed), (2, 1, 1));

        let text = report.render();
        assert!(text.starts_with("2 jobs in 1.50s on 4 units: 1 ok, 1 failed"));
        assert!(text.contains("job-2 b.png [timeout] no reply within 5s"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 1500);
        assert_eq!(json["failures"][0]["kind"], "timeout");
        assert_eq!(json["failures"][0]["job"], 2);
    }

    #[test]
    fn compare_table_has_both_modes() {
        let mode = |ms| ModeReport {
            elapsed: Duration::from_millis(ms),
            heartbeat: HeartbeatStats {
                ticks: 3,
                max_gap: Duration::from_millis(ms),
            },
            succeeded: 2,
        };
        let report = CompareReport {
            jobs: 2,
            capacity: 2,
            blocking: mode(400),
            offloaded: mode(12),
        };
        let text = report.render();
        assert!(text.lines().any(|l| l.starts_with("blocking") && l.contains("400.0")));
        assert!(text.lines().any(|l| l.starts_with("offloaded") && l.contains("12.0")));
    }
}
