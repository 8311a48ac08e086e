use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{DispatchEvent, Dispatcher, InFlight};
use crate::config::UnitLossPolicy;
use crate::error::DispatchError;
use crate::job::{Job, JobId, JobSpec, JobState, Payload};
use crate::protocol::{Artifact, UnitMessage};
use crate::sink::{Failure, FailureKind, ResultSink};
use crate::traits::UnitBackend;
use crate::unit::{Delivery, UnitId, UnitSignal};

/// What woke the dispatcher up.
enum Wake {
    Delivery(Option<Delivery>),
    Deadline,
}

impl<B: UnitBackend> Dispatcher<B> {
    // ── Submission ──────────────────────────────────────────────────

    /// Queue a batch in arrival order and start as many jobs as the pool allows.
    ///
    /// Every job gets an id registered with `sink` before any of them is
    /// settled, even ones that fail right away (unreadable payloads). Returns
    /// an error only if the pool cannot create a single unit, in which case
    /// every queued job has already been recorded as a transport failure.
    ///
    /// Submitting to an idle dispatcher starts a new batch and forgets the
    /// settled states of the previous one.
    #[instrument(skip_all, fields(session = %self.session))]
    pub fn submit<I>(
        &mut self,
        jobs: I,
        sink: &mut ResultSink,
    ) -> Result<Vec<JobId>, DispatchError>
    where
        I: IntoIterator<Item = JobSpec>,
    {
        if self.is_idle() {
            self.settled.clear();
        }

        let batch: Vec<(JobId, JobSpec)> = jobs
            .into_iter()
            .map(|spec| {
                let id = JobId(self.next_job);
                self.next_job += 1;
                (id, spec)
            })
            .collect();
        for (id, _) in &batch {
            sink.register(*id);
        }
        self.metrics.jobs_submitted += batch.len() as u64;

        let mut ids = Vec::with_capacity(batch.len());
        for (id, spec) in batch {
            ids.push(id);
            if let Payload::Unreadable(reason) = &spec.payload {
                let failure = Failure::new(FailureKind::Submission, reason.clone());
                self.fail(sink, id, None, failure);
                continue;
            }
            self.pending.push_back(Job::new(id, spec));
        }

        info!(
            submitted = ids.len(),
            pending = self.pending.len(),
            in_flight = self.in_flight.len(),
            "batch submitted"
        );
        self.pump(sink, None)?;
        Ok(ids)
    }

    /// Fill idle or creatable units from the front of the queue.
    ///
    /// `prefer` is the unit that just finished, so it picks up the next job
    /// instead of a colder one.
    fn pump(
        &mut self,
        sink: &mut ResultSink,
        mut prefer: Option<UnitId>,
    ) -> Result<(), DispatchError> {
        while !self.pending.is_empty() {
            let unit = match self.pool.acquire(prefer.take()) {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(e) => {
                    self.abandon_pending(sink, &e);
                    return Err(e);
                }
            };
            match self.pending.pop_front() {
                Some(job) => self.send(sink, unit, job),
                None => {
                    self.pool.release(unit);
                    break;
                }
            }
        }
        self.metrics.units_spawned = self.pool.spawned();
        self.metrics.observe_busy(self.pool.busy_count());
        Ok(())
    }

    /// Refill after a reply, fault or timeout. Pool exhaustion has already
    /// been turned into job failures, so it is only logged here.
    fn refill(&mut self, sink: &mut ResultSink, prefer: Option<UnitId>) {
        if let Err(e) = self.pump(sink, prefer) {
            error!(
                session = %self.session,
                error = %e,
                "no execution units left, queued jobs failed"
            );
        }
    }

    fn send(&mut self, sink: &mut ResultSink, unit: UnitId, job: Job) {
        let len = job.payload_len() as u64;
        if len > self.config.jobs.max_payload_bytes {
            self.pool.release(unit);
            let reason = format!(
                "payload of {len} bytes exceeds the {} byte limit",
                self.config.jobs.max_payload_bytes
            );
            self.fail(sink, job.id, None, Failure::new(FailureKind::Submission, reason));
            return;
        }

        let frame = match job.to_request() {
            Some(request) => UnitMessage::Process(request).to_bytes(),
            None => Err(DispatchError::Transport("payload unavailable".into())),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.release(unit);
                self.fail(sink, job.id, None, Failure::new(FailureKind::Submission, e.to_string()));
                return;
            }
        };

        match self.pool.post(unit, frame) {
            Ok(()) => {
                let sent_at = Instant::now();
                let deadline = self.config.job_timeout().map(|t| sent_at + t);
                let (id, attempt) = (job.id, job.attempt);
                self.metrics.jobs_sent += 1;
                self.by_unit.insert(unit, id);
                self.in_flight.insert(
                    id,
                    InFlight {
                        job,
                        unit,
                        sent_at,
                        deadline,
                    },
                );
                debug!(job = %id, unit = %unit, attempt, "job sent");
                self.emit(DispatchEvent::Sent { job: id, unit, attempt });
            }
            Err(e) => {
                warn!(job = %job.id, unit = %unit, error = %e, "send failed, evicting unit");
                self.evict(unit);
                self.lose(sink, job, Some(unit), FailureKind::Transport, e.to_string());
            }
        }
    }

    // ── Event loop ──────────────────────────────────────────────────

    /// Wait for one delivery or job deadline and react to it.
    ///
    /// Returns `false` once nothing is queued or in flight.
    pub async fn step(&mut self, sink: &mut ResultSink) -> bool {
        if self.in_flight.is_empty() {
            if self.pending.is_empty() {
                return false;
            }
            self.refill(sink, None);
            if self.in_flight.is_empty() {
                if !self.pending.is_empty() {
                    let cause = DispatchError::NoUnits("no unit accepted a job".into());
                    warn!(session = %self.session, pending = self.pending.len(), "queue stalled");
                    self.abandon_pending(sink, &cause);
                }
                return false;
            }
        }

        let deadline = self.in_flight.values().filter_map(|f| f.deadline).min();
        let wake = tokio::select! {
            delivery = self.pool.recv() => Wake::Delivery(delivery),
            _ = sleep_until(deadline) => Wake::Deadline,
        };

        match wake {
            Wake::Delivery(Some(delivery)) => self.on_delivery(sink, delivery),
            Wake::Delivery(None) => {
                warn!(session = %self.session, "delivery channel closed");
                return false;
            }
            Wake::Deadline => self.expire_overdue(sink),
        }
        true
    }

    /// Drive the batch until every submitted job has an outcome.
    ///
    /// With `pool.keep_warm = false` the pool is torn down once the batch drains.
    pub async fn run_until_complete(&mut self, sink: &mut ResultSink) {
        while self.step(sink).await {}
        info!(
            session = %self.session,
            completed = sink.progress().completed,
            total = sink.progress().total,
            failed = self.metrics.total_failed(),
            "batch drained"
        );
        if !self.config.pool.keep_warm {
            self.pool.teardown(self.config.teardown_grace()).await;
        }
    }

    /// Drain outstanding work, then tear the pool down. Safe to call repeatedly.
    pub async fn shutdown(&mut self, sink: &mut ResultSink) {
        while self.step(sink).await {}
        self.pool.teardown(self.config.teardown_grace()).await;
    }

    // ── Deliveries ──────────────────────────────────────────────────

    fn on_delivery(&mut self, sink: &mut ResultSink, delivery: Delivery) {
        let Delivery { unit, signal } = delivery;
        if !self.pool.is_member(unit) {
            self.metrics.stale_deliveries += 1;
            debug!(unit = %unit, "dropping delivery from evicted unit");
            return;
        }

        match signal {
            UnitSignal::Faulted(reason) => self.on_fault(sink, unit, reason),
            UnitSignal::Frame(bytes) => match UnitMessage::from_bytes(&bytes) {
                Ok(message) => self.on_message(sink, unit, message),
                Err(e) => self.on_fault(sink, unit, format!("undecodable reply: {e}")),
            },
        }
    }

    fn on_message(&mut self, sink: &mut ResultSink, unit: UnitId, message: UnitMessage) {
        match message {
            UnitMessage::ProcessComplete(reply) => {
                self.on_result(sink, unit, reply.id, Ok(reply.result))
            }
            UnitMessage::ProcessError(reply) => {
                self.on_result(sink, unit, reply.id, Err(reply.error_message))
            }
            other => self.violation(unit, format!("unexpected {} message", other.kind())),
        }
    }

    fn on_result(
        &mut self,
        sink: &mut ResultSink,
        unit: UnitId,
        id: JobId,
        result: Result<Artifact, String>,
    ) {
        if !self.in_flight.get(&id).is_some_and(|f| f.unit == unit) {
            self.violation(unit, format!("reply for {id} which is not in flight on this unit"));
            return;
        }
        let Some(flight) = self.in_flight.remove(&id) else {
            return;
        };
        self.by_unit.remove(&unit);

        match result {
            Ok(artifact) => {
                self.metrics.record_completion(flight.sent_at.elapsed());
                self.settled.insert(id, JobState::Completed);
                if let Err(e) = sink.record_success(id, artifact) {
                    warn!(job = %id, error = %e, "outcome not recorded");
                }
                debug!(job = %id, unit = %unit, "job completed");
                self.emit(DispatchEvent::Completed { job: id, unit });
            }
            Err(message) => {
                self.fail(sink, id, Some(unit), Failure::new(FailureKind::Execution, message));
            }
        }

        self.pool.release(unit);
        self.refill(sink, Some(unit));
    }

    fn on_fault(&mut self, sink: &mut ResultSink, unit: UnitId, reason: String) {
        warn!(unit = %unit, reason = %reason, "unit faulted");
        let job = self
            .by_unit
            .remove(&unit)
            .and_then(|id| self.in_flight.remove(&id));
        self.evict(unit);
        if let Some(flight) = job {
            self.lose(sink, flight.job, Some(unit), FailureKind::Transport, reason);
        }
        self.refill(sink, None);
    }

    /// Evict units whose job ran past its deadline.
    fn expire_overdue(&mut self, sink: &mut ResultSink) {
        let now = Instant::now();
        let overdue: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            let Some(flight) = self.in_flight.remove(&id) else {
                continue;
            };
            self.by_unit.remove(&flight.unit);
            let waited = now.duration_since(flight.sent_at);
            warn!(job = %id, unit = %flight.unit, waited = ?waited, "job timed out, evicting unit");
            self.evict(flight.unit);
            let unit = flight.unit;
            self.lose(
                sink,
                flight.job,
                Some(unit),
                FailureKind::Timeout,
                format!("no reply within {waited:?}"),
            );
        }
        self.refill(sink, None);
    }

    // ── Outcomes ────────────────────────────────────────────────────

    /// A job whose unit was lost: retry it at the front of the queue or fail it.
    fn lose(
        &mut self,
        sink: &mut ResultSink,
        mut job: Job,
        unit: Option<UnitId>,
        kind: FailureKind,
        reason: String,
    ) {
        let retry = self.config.jobs.on_unit_loss == UnitLossPolicy::Retry
            && job.attempt <= self.config.jobs.max_retries;
        if retry {
            job.attempt += 1;
            self.metrics.retries += 1;
            info!(job = %job.id, attempt = job.attempt, kind = %kind, "re-queueing job");
            let id = job.id;
            self.pending.push_front(job);
            self.emit(DispatchEvent::Retried { job: id });
        } else {
            self.fail(sink, job.id, unit, Failure::new(kind, reason));
        }
    }

    fn fail(&mut self, sink: &mut ResultSink, id: JobId, unit: Option<UnitId>, failure: Failure) {
        let kind = failure.kind;
        debug!(job = %id, failure = %failure, "job failed");
        self.metrics.record_failure(kind);
        self.settled.insert(id, JobState::Failed);
        if let Err(e) = sink.record_failure(id, failure) {
            warn!(job = %id, error = %e, "outcome not recorded");
        }
        self.emit(DispatchEvent::Failed { job: id, unit, kind });
    }

    fn abandon_pending(&mut self, sink: &mut ResultSink, cause: &DispatchError) {
        let jobs: Vec<Job> = self.pending.drain(..).collect();
        for job in jobs {
            self.fail(sink, job.id, None, Failure::new(FailureKind::Transport, cause.to_string()));
        }
    }

    fn evict(&mut self, unit: UnitId) {
        if self.pool.evict(unit) {
            self.metrics.units_evicted += 1;
            self.emit(DispatchEvent::UnitEvicted { unit });
        }
    }

    fn violation(&mut self, unit: UnitId, detail: String) {
        self.metrics.protocol_violations += 1;
        warn!(unit = %unit, detail = %detail, "protocol violation, reply ignored");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
