//! Unit identity and the single delivery channel shared by all units.
//!
//! Every unit in a pool reports back through one persistent channel. A unit
//! never talks to the dispatcher directly; it holds an [`Outlet`] stamped with
//! its own [`UnitId`] so the dispatcher can demultiplex replies by unit and
//! then by correlation id.

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DispatchError;
use crate::protocol::UnitMessage;

/// Pool-assigned identity of an execution unit. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// What a unit can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSignal {
    /// An encoded [`UnitMessage`].
    Frame(Vec<u8>),
    /// The background context faulted and cannot be used again.
    Faulted(String),
}

/// A signal tagged with the unit that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub unit: UnitId,
    pub signal: UnitSignal,
}

/// Sending half of the delivery channel, bound to one unit.
#[derive(Debug, Clone)]
pub struct Outlet {
    unit: UnitId,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Outlet {
    pub(crate) fn new(unit: UnitId, tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { unit, tx }
    }

    /// The unit this outlet belongs to.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Encode and deliver a reply frame.
    ///
    /// Callable from any thread; never blocks.
    pub fn reply(&self, message: &UnitMessage) -> Result<(), DispatchError> {
        let frame = message.to_bytes()?;
        self.send(UnitSignal::Frame(frame))
    }

    /// Deliver raw bytes as a frame without encoding.
    pub fn reply_raw(&self, frame: Vec<u8>) -> Result<(), DispatchError> {
        self.send(UnitSignal::Frame(frame))
    }

    /// Report that the unit is no longer usable.
    pub fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.send(UnitSignal::Faulted(reason.clone())).is_err() {
            debug!(unit = %self.unit, %reason, "fault report dropped, dispatcher gone");
        }
    }

    fn send(&self, signal: UnitSignal) -> Result<(), DispatchError> {
        self.tx
            .send(Delivery {
                unit: self.unit,
                signal,
            })
            .map_err(|_| DispatchError::Transport("delivery channel closed".into()))
    }
}
