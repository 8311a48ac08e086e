//! Periodic tick on the current runtime thread, recording how late each tick ran.
//!
//! On a current-thread runtime any blocking work on the dispatching thread
//! shows up directly as a large gap between ticks.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeartbeatStats {
    pub ticks: u64,
    /// Longest observed interval between consecutive ticks.
    pub max_gap: Duration,
}

pub struct Heartbeat {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<HeartbeatStats>,
}

impl Heartbeat {
    pub fn start(period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut stats = HeartbeatStats::default();
            let mut last: Option<Instant> = None;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        if let Some(prev) = last {
                            stats.max_gap = stats.max_gap.max(now.duration_since(prev));
                        }
                        last = Some(now);
                        stats.ticks += 1;
                    }
                    _ = &mut stopped => break,
                }
            }
            stats
        });
        Self { stop, handle }
    }

    pub async fn stop(self) -> HeartbeatStats {
        let _ = self.stop.send(());
        self.handle.await.unwrap_or_default()
    }
}
