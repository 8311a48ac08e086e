pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod sink;
pub mod thread;
pub mod traits;
pub mod unit;

pub use config::{DispatchConfig, JobsConfig, PoolConfig, UnitLossPolicy};
pub use dispatcher::{DispatchEvent, Dispatcher};
pub use error::DispatchError;
pub use job::{Job, JobId, JobSpec, JobState, Payload};
pub use metrics::DispatchMetrics;
pub use pool::UnitPool;
pub use protocol::{Artifact, ProcessComplete, ProcessError, ProcessRequest, UnitMessage};
pub use sink::{Failure, FailureKind, Outcome, Progress, ResultSink};
pub use thread::{ThreadBackend, ThreadUnit};
pub use traits::{ExecutionUnit, Processor, UnitBackend};
pub use unit::{Delivery, Outlet, UnitId, UnitSignal};
