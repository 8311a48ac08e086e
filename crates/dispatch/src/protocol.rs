//! Wire protocol spoken between the dispatcher and its execution units.
//!
//! Every frame is a [`UnitMessage`], an adjacently tagged enum whose JSON
//! rendering is `{ "type": "process", "data": { ... } }`. On the wire frames
//! are MessagePack with named fields, so any backend that speaks this shape
//! can be plugged in behind [`UnitBackend`](crate::UnitBackend).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::job::JobId;

/// A single frame exchanged with an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UnitMessage {
    /// Dispatcher → unit: run one job.
    Process(ProcessRequest),
    /// Unit → dispatcher: job succeeded.
    ProcessComplete(ProcessComplete),
    /// Unit → dispatcher: job failed inside the unit; the unit stays usable.
    ProcessError(ProcessError),
    /// Dispatcher → unit: release resources and acknowledge.
    Cleanup,
    /// Unit → dispatcher: cleanup done, safe to terminate.
    CleanupComplete,
}

/// Outbound `process` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub id: JobId,
    #[serde(with = "frame_bytes")]
    pub payload: Vec<u8>,
    pub label: String,
    pub size_hint: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Inbound `process_complete` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessComplete {
    pub id: JobId,
    pub success: bool,
    pub label: String,
    pub result: Artifact,
    /// The request's metadata, echoed back unchanged.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Inbound `process_error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessError {
    pub id: JobId,
    pub success: bool,
    pub error_message: String,
}

/// The derived artifact a unit produces for a successful job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(with = "frame_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Artifact {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl UnitMessage {
    /// Build a `process_complete` reply echoing the request's label and metadata.
    pub fn complete(request: &ProcessRequest, result: Artifact) -> Self {
        Self::ProcessComplete(ProcessComplete {
            id: request.id,
            success: true,
            label: request.label.clone(),
            result,
            metadata: request.metadata.clone(),
        })
    }

    /// Build a `process_error` reply.
    pub fn error(id: JobId, error_message: impl Into<String>) -> Self {
        Self::ProcessError(ProcessError {
            id,
            success: false,
            error_message: error_message.into(),
        })
    }

    /// The `type` tag of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::ProcessComplete(_) => "process_complete",
            Self::ProcessError(_) => "process_error",
            Self::Cleanup => "cleanup",
            Self::CleanupComplete => "cleanup_complete",
        }
    }

    /// Correlation id carried by the frame, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Process(req) => Some(req.id),
            Self::ProcessComplete(c) => Some(c.id),
            Self::ProcessError(e) => Some(e.id),
            Self::Cleanup | Self::CleanupComplete => None,
        }
    }

    /// Serialize this frame to MessagePack bytes (named fields).
    pub fn to_bytes(&self) -> Result<Vec<u8>, DispatchError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize a frame from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DispatchError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Serde helper so `Vec<u8>` fields travel as MessagePack `bin` rather than
/// an array of integers. Accepts either form when decoding.
mod frame_bytes {
    use std::fmt;

    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        d.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte buffer")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}
