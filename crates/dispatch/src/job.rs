//! Job model: what callers submit and what the dispatcher tracks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::ProcessRequest;

/// Correlation id assigned to a job at submission time.
///
/// Ids are handed out by a per-dispatcher monotonic counter starting at 1,
/// so two dispatchers fed the same batch assign the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Input data for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw bytes ready to be shipped to a unit.
    Bytes(Vec<u8>),
    /// The source could not be read; the job fails at submission.
    Unreadable(String),
}

/// A caller-side job description, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Human-readable label, typically the file name.
    pub label: String,
    /// Size of the source in bytes, as reported by the job source.
    pub size_hint: u64,
    pub payload: Payload,
    /// Free-form metadata echoed to the unit.
    pub metadata: BTreeMap<String, String>,
}

impl JobSpec {
    /// Create a job from in-memory bytes. The size hint is the payload length.
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            size_hint: bytes.len() as u64,
            payload: Payload::Bytes(bytes),
            metadata: BTreeMap::new(),
        }
    }

    /// Create a job whose source could not be read.
    pub fn unreadable(label: impl Into<String>, size_hint: u64, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            size_hint,
            payload: Payload::Unreadable(reason.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A submitted job: an immutable spec plus its id and attempt number.
#[derive(Debug, Clone)]
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) spec: JobSpec,
    pub(crate) attempt: u32,
}

impl Job {
    pub(crate) fn new(id: JobId, spec: JobSpec) -> Self {
        Self { id, spec, attempt: 1 }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    /// 1 for the first send, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn payload_len(&self) -> usize {
        match &self.spec.payload {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Unreadable(_) => 0,
        }
    }

    /// Build the outbound `process` request for this job.
    ///
    /// Returns `None` when the payload is unavailable.
    pub(crate) fn to_request(&self) -> Option<ProcessRequest> {
        match &self.spec.payload {
            Payload::Bytes(bytes) => Some(ProcessRequest {
                id: self.id,
                payload: bytes.clone(),
                label: self.spec.label.clone(),
                size_hint: self.spec.size_hint,
                metadata: self.spec.metadata.clone(),
            }),
            Payload::Unreadable(_) => None,
        }
    }
}

/// Lifecycle of a job: `Pending → Sent → {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Sent,
    Completed,
    Failed,
}
