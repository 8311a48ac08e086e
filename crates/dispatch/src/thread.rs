//! Thread-backed execution units.
//!
//! Each unit is a dedicated, named OS thread with its own inbox. It decodes
//! frames, runs the [`Processor`] for `process` requests, and answers through
//! its [`Outlet`]. Nothing is shared with the dispatcher except the processor
//! itself, which is immutable.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::protocol::UnitMessage;
use crate::traits::{ExecutionUnit, Processor, UnitBackend};
use crate::unit::{Outlet, UnitId};

/// Spawns one OS thread per unit, all sharing the same processor.
pub struct ThreadBackend<P: Processor> {
    processor: Arc<P>,
}

impl<P: Processor> ThreadBackend<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }

    pub fn from_arc(processor: Arc<P>) -> Self {
        Self { processor }
    }
}

impl<P: Processor> UnitBackend for ThreadBackend<P> {
    type Unit = ThreadUnit;

    fn spawn(&mut self, outlet: Outlet) -> Result<ThreadUnit, DispatchError> {
        let unit = outlet.unit();
        let (inbox_tx, inbox_rx) = mpsc::channel::<Vec<u8>>();
        let terminated = Arc::new(AtomicBool::new(false));

        let processor = Arc::clone(&self.processor);
        let flag = Arc::clone(&terminated);
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", self.processor.name(), unit))
            .spawn(move || unit_loop(processor, inbox_rx, outlet, flag))
            .map_err(|e| DispatchError::UnitSpawn(e.to_string()))?;

        debug!(%unit, processor = %self.processor.name(), "spawned unit thread");
        Ok(ThreadUnit {
            unit,
            inbox: Some(inbox_tx),
            terminated,
            handle: Some(handle),
        })
    }
}

/// Handle to a unit thread.
///
/// OS threads cannot be killed, so `terminate` closes the inbox, raises the
/// terminated flag and detaches the thread. A thread stuck inside the
/// processor keeps running until the processor returns, then exits without
/// replying.
pub struct ThreadUnit {
    unit: UnitId,
    inbox: Option<mpsc::Sender<Vec<u8>>>,
    terminated: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ExecutionUnit for ThreadUnit {
    fn post(&mut self, frame: Vec<u8>) -> Result<(), DispatchError> {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| DispatchError::Transport(format!("{} was terminated", self.unit)))?;
        inbox
            .send(frame)
            .map_err(|_| DispatchError::Transport(format!("{} inbox closed", self.unit)))
    }

    fn terminate(&mut self) {
        if self.inbox.take().is_none() {
            return;
        }
        self.terminated.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!(unit = %self.unit, "detaching busy unit thread");
            }
        }
    }
}

impl Drop for ThreadUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn unit_loop<P: Processor>(
    processor: Arc<P>,
    inbox: mpsc::Receiver<Vec<u8>>,
    outlet: Outlet,
    terminated: Arc<AtomicBool>,
) {
    while let Ok(frame) = inbox.recv() {
        let message = match UnitMessage::from_bytes(&frame) {
            Ok(m) => m,
            Err(e) => {
                outlet.fault(format!("undecodable frame: {e}"));
                return;
            }
        };

        match message {
            UnitMessage::Process(request) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| processor.process(&request)));
                if terminated.load(Ordering::Acquire) {
                    return;
                }
                let reply = match result {
                    Ok(Ok(artifact)) => UnitMessage::complete(&request, artifact),
                    Ok(Err(reason)) => UnitMessage::error(request.id, reason),
                    Err(payload) => {
                        outlet.fault(format!("processor panicked: {}", panic_message(&*payload)));
                        return;
                    }
                };
                if let Err(e) = outlet.reply(&reply) {
                    outlet.fault(format!("failed to deliver reply: {e}"));
                    return;
                }
            }
            UnitMessage::Cleanup => {
                let _ = outlet.reply(&UnitMessage::CleanupComplete);
                return;
            }
            other => {
                warn!(unit = %outlet.unit(), kind = other.kind(), "unexpected frame for unit");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
