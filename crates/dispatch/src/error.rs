use thiserror::Error;

use crate::job::JobId;
use crate::unit::UnitId;

/// Errors that can occur in the dispatch layer.
///
/// Per-job problems are never surfaced through this type to the batch caller;
/// the dispatcher turns them into failure outcomes in the
/// [`ResultSink`](crate::ResultSink). Only pool-level failures and API misuse
/// (duplicate outcomes, bad config) come back as a `DispatchError`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("frame encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("frame decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("failed to spawn execution unit: {0}")]
    UnitSpawn(String),

    #[error("no execution unit could be created: {0}")]
    NoUnits(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unit {0} is not a member of the pool")]
    UnknownUnit(UnitId),

    #[error("outcome for {0} was already recorded")]
    DuplicateOutcome(JobId),

    #[error("{0} was never submitted to this sink")]
    UnknownJob(JobId),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
