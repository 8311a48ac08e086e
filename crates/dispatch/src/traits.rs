use crate::error::DispatchError;
use crate::protocol::{Artifact, ProcessRequest};
use crate::unit::Outlet;

/// A background execution context owned by a [`UnitPool`](crate::UnitPool).
///
/// The pool only ever hands a unit encoded [`UnitMessage`](crate::UnitMessage)
/// frames; replies go through the [`Outlet`] the unit was spawned with.
pub trait ExecutionUnit: Send {
    /// Hand a frame to the unit. Must not block.
    ///
    /// An error means the unit can no longer accept work and will be evicted.
    fn post(&mut self, frame: Vec<u8>) -> Result<(), DispatchError>;

    /// Forcibly stop the unit. Any in-flight job is abandoned and any reply it
    /// produces afterwards is discarded by the dispatcher. Must be idempotent.
    fn terminate(&mut self);
}

/// Creates execution units on demand.
pub trait UnitBackend: Send {
    type Unit: ExecutionUnit;

    /// Start a fresh unit that reports through `outlet`.
    fn spawn(&mut self, outlet: Outlet) -> Result<Self::Unit, DispatchError>;
}

/// The decode/transform step a thread-backed unit runs for each job.
///
/// A returned `Err` becomes a `process_error` reply; a panic is treated as a
/// unit fault and the unit is replaced.
pub trait Processor: Send + Sync + 'static {
    /// Human-readable name used for unit thread names and logging.
    fn name(&self) -> &str;

    fn process(&self, request: &ProcessRequest) -> Result<Artifact, String>;
}
