//! Dispatcher: owns the unit pool and the pending queue, and matches replies
//! back to jobs by id.
//!
//! The dispatcher is single-owner state driven from one task. Units report
//! through the pool's delivery channel; [`Dispatcher::step`] waits for the next
//! delivery or job deadline and reacts to it, refilling freed units from the
//! front of the pending queue so the pool stays saturated while work remains.

mod flow;

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::job::{Job, JobId, JobState};
use crate::metrics::DispatchMetrics;
use crate::pool::UnitPool;
use crate::sink::FailureKind;
use crate::traits::UnitBackend;
use crate::unit::UnitId;

/// Notable state changes, published to an optional observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Sent {
        job: JobId,
        unit: UnitId,
        attempt: u32,
    },
    Completed {
        job: JobId,
        unit: UnitId,
    },
    Failed {
        job: JobId,
        unit: Option<UnitId>,
        kind: FailureKind,
    },
    /// The job lost its unit and went back to the front of the queue.
    Retried {
        job: JobId,
    },
    UnitEvicted {
        unit: UnitId,
    },
}

/// A job that has been handed to a unit and not yet answered.
struct InFlight {
    job: Job,
    unit: UnitId,
    sent_at: Instant,
    deadline: Option<Instant>,
}

pub struct Dispatcher<B: UnitBackend> {
    session: Uuid,
    config: DispatchConfig,
    pool: UnitPool<B>,
    pending: VecDeque<Job>,
    in_flight: HashMap<JobId, InFlight>,
    by_unit: HashMap<UnitId, JobId>,
    settled: HashMap<JobId, JobState>,
    next_job: u64,
    metrics: DispatchMetrics,
    events: Option<mpsc::UnboundedSender<DispatchEvent>>,
}

impl<B: UnitBackend> Dispatcher<B> {
    /// Build a dispatcher over `backend`. Units are created lazily on first submit.
    pub fn new(config: DispatchConfig, backend: B) -> Result<Self, DispatchError> {
        config.validate()?;
        let capacity = config.resolved_capacity();
        let session = Uuid::new_v4();
        info!(
            session = %session,
            capacity,
            timeout = ?config.job_timeout(),
            on_unit_loss = %config.jobs.on_unit_loss,
            "dispatcher ready"
        );
        Ok(Self {
            session,
            pool: UnitPool::new(backend, capacity),
            config,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            by_unit: HashMap::new(),
            settled: HashMap::new(),
            next_job: 1,
            metrics: DispatchMetrics::default(),
            events: None,
        })
    }

    /// Subscribe to [`DispatchEvent`]s. A later call replaces the earlier observer.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<DispatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn pool(&self) -> &UnitPool<B> {
        &self.pool
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn busy_units(&self) -> usize {
        self.pool.busy_count()
    }

    /// The unit currently running `id`, if it is in flight.
    pub fn unit_of(&self, id: JobId) -> Option<UnitId> {
        self.in_flight.get(&id).map(|f| f.unit)
    }

    /// True when no job is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Where a job is in its lifecycle.
    ///
    /// Only jobs of the current batch are tracked: `None` for ids this
    /// dispatcher never issued and for jobs settled before the last submit
    /// to an idle dispatcher.
    pub fn state_of(&self, id: JobId) -> Option<JobState> {
        if let Some(state) = self.settled.get(&id) {
            return Some(*state);
        }
        if self.in_flight.contains_key(&id) {
            return Some(JobState::Sent);
        }
        if self.pending.iter().any(|j| j.id == id) {
            return Some(JobState::Pending);
        }
        None
    }

    fn emit(&mut self, event: DispatchEvent) {
        let closed = match &self.events {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if closed {
            self.events = None;
        }
    }
}
