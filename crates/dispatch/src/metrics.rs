use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sink::FailureKind;

/// Dispatcher operational counters, cheap to clone for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchMetrics {
    /// Jobs accepted by `submit`.
    pub jobs_submitted: u64,
    /// Frames successfully handed to a unit (retries count again).
    pub jobs_sent: u64,
    pub jobs_completed: u64,
    /// Terminal failures by kind.
    pub jobs_failed: HashMap<FailureKind, u64>,
    /// Jobs re-queued after their unit was lost.
    pub retries: u64,
    pub units_spawned: u64,
    pub units_evicted: u64,
    /// Replies with unknown, foreign or already-resolved ids, or unexpected types.
    pub protocol_violations: u64,
    /// Deliveries from units no longer in the pool.
    pub stale_deliveries: u64,
    /// Highest number of simultaneously busy units observed.
    pub peak_busy_units: usize,
    /// Mean wall time from send to reply over completed jobs.
    pub avg_job_duration: Duration,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl DispatchMetrics {
    /// Record a successful job and fold its duration into the running mean.
    pub fn record_completion(&mut self, duration: Duration) {
        self.jobs_completed += 1;
        self.last_completed_at = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.jobs_completed;
        self.avg_job_duration = if count == 1 {
            duration
        } else {
            let prev = self.avg_job_duration.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            Duration::from_nanos((prev + (cur - prev) / count as f64) as u64)
        };
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        *self.jobs_failed.entry(kind).or_default() += 1;
    }

    pub fn observe_busy(&mut self, busy: usize) {
        self.peak_busy_units = self.peak_busy_units.max(busy);
    }

    /// Sum of all terminal failures.
    pub fn total_failed(&self) -> u64 {
        self.jobs_failed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_completion_sets_average() {
        let mut m = DispatchMetrics::default();
        m.record_completion(Duration::from_millis(100));
        assert_eq!(m.jobs_completed, 1);
        assert_eq!(m.avg_job_duration, Duration::from_millis(100));
        assert!(m.last_completed_at.is_some());
    }

    #[test]
    fn completions_average() {
        let mut m = DispatchMetrics::default();
        m.record_completion(Duration::from_millis(100));
        m.record_completion(Duration::from_millis(200));
        let avg = m.avg_job_duration.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {avg}ms");
    }

    #[test]
    fn failures_by_kind_and_peak() {
        let mut m = DispatchMetrics::default();
        m.record_failure(FailureKind::Execution);
        m.record_failure(FailureKind::Execution);
        m.record_failure(FailureKind::Timeout);
        m.observe_busy(3);
        m.observe_busy(1);
        assert_eq!(m.jobs_failed[&FailureKind::Execution], 2);
        assert_eq!(m.total_failed(), 3);
        assert_eq!(m.peak_busy_units, 3);
    }
}
