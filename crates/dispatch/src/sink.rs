//! Outcome accumulation and progress tracking for a batch.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::DispatchError;
use crate::job::JobId;
use crate::protocol::Artifact;

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The payload could not be prepared or handed to a unit.
    Submission,
    /// The unit ran the job and replied `process_error`.
    Execution,
    /// The unit faulted or became unreachable.
    Transport,
    /// The unit did not answer within the job timeout.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submission => "submission",
            Self::Execution => "execution",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Artifact),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// `(completed, total)` snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Collects exactly one outcome per submitted job.
///
/// The sink belongs to the caller; the dispatcher registers ids on submit and
/// writes outcomes as replies arrive. Progress is also published on a
/// [`watch`] channel so a UI can follow along without polling.
pub struct ResultSink {
    registered: HashSet<JobId>,
    outcomes: HashMap<JobId, Outcome>,
    progress_tx: watch::Sender<Progress>,
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink {
    pub fn new() -> Self {
        let (progress_tx, _) = watch::channel(Progress::default());
        Self {
            registered: HashSet::new(),
            outcomes: HashMap::new(),
            progress_tx,
        }
    }

    /// Count a newly submitted job towards the total.
    pub fn register(&mut self, id: JobId) {
        if self.registered.insert(id) {
            self.publish();
        }
    }

    pub fn record_success(&mut self, id: JobId, artifact: Artifact) -> Result<(), DispatchError> {
        self.record(id, Outcome::Success(artifact))
    }

    pub fn record_failure(&mut self, id: JobId, failure: Failure) -> Result<(), DispatchError> {
        self.record(id, Outcome::Failure(failure))
    }

    fn record(&mut self, id: JobId, outcome: Outcome) -> Result<(), DispatchError> {
        if !self.registered.contains(&id) {
            return Err(DispatchError::UnknownJob(id));
        }
        if self.outcomes.contains_key(&id) {
            return Err(DispatchError::DuplicateOutcome(id));
        }
        self.outcomes.insert(id, outcome);
        self.publish();
        Ok(())
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.outcomes.len(),
            total: self.registered.len(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress().is_complete()
    }

    pub fn outcome(&self, id: JobId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }

    pub fn outcomes(&self) -> &HashMap<JobId, Outcome> {
        &self.outcomes
    }

    pub fn successes(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (JobId, &Failure)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            Outcome::Failure(f) => Some((*id, f)),
            Outcome::Success(_) => None,
        })
    }

    /// Follow progress updates.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress_tx.subscribe()
    }

    fn publish(&self) {
        self.progress_tx.send_replace(self.progress());
    }
}
