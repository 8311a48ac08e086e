//! Fixed-capacity pool of execution units with busy/idle tracking.
//!
//! The pool grows lazily up to `capacity`, hands out at most one job per unit,
//! and owns the single delivery channel every unit reports through. It is
//! driven exclusively by the [`Dispatcher`](crate::Dispatcher).

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatchError;
use crate::protocol::UnitMessage;
use crate::traits::{ExecutionUnit, UnitBackend};
use crate::unit::{Delivery, Outlet, UnitId, UnitSignal};

struct Member<U> {
    id: UnitId,
    unit: U,
    busy: bool,
}

pub struct UnitPool<B: UnitBackend> {
    backend: B,
    capacity: usize,
    units: Vec<Member<B::Unit>>,
    next_unit: u64,
    spawned: u64,
    deliveries_tx: mpsc::UnboundedSender<Delivery>,
    deliveries_rx: mpsc::UnboundedReceiver<Delivery>,
}

impl<B: UnitBackend> UnitPool<B> {
    /// Create an empty pool. `capacity` is clamped to at least 1.
    pub fn new(backend: B, capacity: usize) -> Self {
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            capacity: capacity.max(1),
            units: Vec::new(),
            next_unit: 1,
            spawned: 0,
            deliveries_tx,
            deliveries_rx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.units.iter().filter(|m| m.busy).count()
    }

    pub fn idle_count(&self) -> usize {
        self.units.len() - self.busy_count()
    }

    /// Total units ever created by this pool.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn is_member(&self, id: UnitId) -> bool {
        self.units.iter().any(|m| m.id == id)
    }

    pub fn is_busy(&self, id: UnitId) -> bool {
        self.units.iter().any(|m| m.id == id && m.busy)
    }

    /// Ids of all live units, in creation order.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().map(|m| m.id).collect()
    }

    /// Take an idle unit and mark it busy.
    ///
    /// `prefer` is tried first when it names an idle member. Otherwise the
    /// oldest idle unit is used, then a new unit is created if the pool is
    /// below capacity. Returns `Ok(None)` when every unit is busy at capacity
    /// or a new unit could not be created while others exist. Fails only when
    /// the pool is empty and creating its first unit fails.
    pub fn acquire(&mut self, prefer: Option<UnitId>) -> Result<Option<UnitId>, DispatchError> {
        if let Some(id) = prefer {
            if let Some(member) = self.units.iter_mut().find(|m| m.id == id && !m.busy) {
                member.busy = true;
                return Ok(Some(id));
            }
        }

        if let Some(member) = self.units.iter_mut().find(|m| !m.busy) {
            member.busy = true;
            return Ok(Some(member.id));
        }

        if self.units.len() >= self.capacity {
            return Ok(None);
        }

        let id = UnitId(self.next_unit);
        self.next_unit += 1;
        let outlet = Outlet::new(id, self.deliveries_tx.clone());
        match self.backend.spawn(outlet) {
            Ok(unit) => {
                self.spawned += 1;
                self.units.push(Member {
                    id,
                    unit,
                    busy: true,
                });
                debug!(
                    unit = %id,
                    size = self.units.len(),
                    capacity = self.capacity,
                    "unit created"
                );
                Ok(Some(id))
            }
            Err(e) if self.units.is_empty() => Err(DispatchError::NoUnits(e.to_string())),
            Err(e) => {
                warn!(error = %e, size = self.units.len(), "unit creation failed, jobs will wait");
                Ok(None)
            }
        }
    }

    /// Mark a unit idle. Returns `false` (and logs) if the unit is not a member.
    pub fn release(&mut self, id: UnitId) -> bool {
        match self.units.iter_mut().find(|m| m.id == id) {
            Some(member) => {
                member.busy = false;
                true
            }
            None => {
                warn!(unit = %id, "protocol violation: release of a unit that is not in the pool");
                false
            }
        }
    }

    /// Hand a frame to a member unit.
    pub fn post(&mut self, id: UnitId, frame: Vec<u8>) -> Result<(), DispatchError> {
        let member = self
            .units
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(DispatchError::UnknownUnit(id))?;
        member.unit.post(frame)
    }

    /// Forcibly terminate a unit and drop it from the pool.
    ///
    /// The freed slot is refilled by the next `acquire`.
    pub fn evict(&mut self, id: UnitId) -> bool {
        match self.units.iter().position(|m| m.id == id) {
            Some(idx) => {
                let mut member = self.units.remove(idx);
                member.unit.terminate();
                info!(unit = %id, size = self.units.len(), "unit evicted");
                true
            }
            None => false,
        }
    }

    /// Wait for the next delivery from any unit, live or already evicted.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries_rx.recv().await
    }

    /// Cooperative-then-forced shutdown of every unit.
    ///
    /// Sends `cleanup` to every unit, waits up to `grace` for each to answer
    /// `cleanup_complete`, then terminates all of them and empties the pool.
    /// Any job still running is abandoned. Calling it on an empty pool is a
    /// no-op.
    #[instrument(skip_all, fields(units = self.units.len()))]
    pub async fn teardown(&mut self, grace: Duration) {
        if self.units.is_empty() {
            return;
        }

        let cleanup = match UnitMessage::Cleanup.to_bytes() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "failed to encode cleanup frame, terminating directly");
                None
            }
        };

        let mut awaiting: HashSet<UnitId> = HashSet::new();
        if let Some(frame) = cleanup {
            for member in &mut self.units {
                match member.unit.post(frame.clone()) {
                    Ok(()) => {
                        awaiting.insert(member.id);
                    }
                    Err(e) => debug!(unit = %member.id, error = %e, "cleanup not delivered"),
                }
            }
        }

        let deadline = Instant::now() + grace;
        while !awaiting.is_empty() {
            match tokio::time::timeout_at(deadline, self.deliveries_rx.recv()).await {
                Ok(Some(delivery)) => {
                    let acked = match &delivery.signal {
                        UnitSignal::Frame(bytes) => matches!(
                            UnitMessage::from_bytes(bytes),
                            Ok(UnitMessage::CleanupComplete)
                        ),
                        UnitSignal::Faulted(_) => true,
                    };
                    if acked {
                        awaiting.remove(&delivery.unit);
                    } else {
                        debug!(unit = %delivery.unit, "discarding delivery during teardown");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = awaiting.len(),
                        grace = ?grace,
                        "cleanup grace expired, forcing termination"
                    );
                    break;
                }
            }
        }

        let count = self.units.len();
        for mut member in self.units.drain(..) {
            member.unit.terminate();
        }
        info!(units = count, "pool torn down");
    }
}
