//! Scripted execution units for dispatcher tests.
//!
//! Each unit is a tokio task reading frames from an inbox. What it does with
//! a `process` request is decided by a plan keyed on the job label, so tests
//! can mix slow, failing, hanging and misbehaving jobs in one batch.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offload_dispatch::{
    Artifact, DispatchError, DispatchEvent, ExecutionUnit, JobId, Outlet, ProcessRequest,
    UnitBackend, UnitId, UnitMessage,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a unit answers a `process` request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `process_complete` with the payload reversed.
    Complete,
    /// `process_error` with the given message.
    Error(String),
    /// Never answer.
    Hang,
    /// Hang the first time this label is seen, complete afterwards.
    HangOnce,
    /// Report a fault and stop.
    Fault(String),
    /// Answer `process_complete` twice.
    Duplicate,
    /// Answer for a job id that is not ours, then for the right one.
    ForeignIdFirst,
    /// Send bytes that are not a frame.
    Garbage,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub delay: Duration,
    pub reply: Reply,
}

impl Script {
    pub fn after(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            reply: Reply::Complete,
        }
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }
}

type Plan = Arc<dyn Fn(&str) -> Script + Send + Sync>;

/// Observations shared between the backend, its units and the test.
#[derive(Default)]
pub struct Probe {
    /// Jobs currently handed to each unit and not yet answered.
    assigned: Mutex<HashMap<UnitId, usize>>,
    /// Set if a unit was ever handed a job while holding another.
    pub overlap: AtomicBool,
    /// `(unit, job)` in the order units started processing.
    pub started: Mutex<Vec<(UnitId, JobId)>>,
    pub terminated: Mutex<Vec<UnitId>>,
    hung_once: Mutex<HashSet<String>>,
}

impl Probe {
    fn assign(&self, unit: UnitId) {
        let mut assigned = self.assigned.lock().unwrap();
        let count = assigned.entry(unit).or_default();
        if *count > 0 {
            self.overlap.store(true, Ordering::SeqCst);
        }
        *count += 1;
    }

    fn settle(&self, unit: UnitId) {
        if let Some(count) = self.assigned.lock().unwrap().get_mut(&unit) {
            *count = count.saturating_sub(1);
        }
    }

    fn clear(&self, unit: UnitId) {
        self.assigned.lock().unwrap().remove(&unit);
    }

    pub fn had_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> Vec<UnitId> {
        self.terminated.lock().unwrap().clone()
    }
}

pub struct ScriptedBackend {
    plan: Plan,
    pub probe: Arc<Probe>,
    spawn_fails: bool,
    rejects: Option<String>,
}

impl ScriptedBackend {
    pub fn new(plan: impl Fn(&str) -> Script + Send + Sync + 'static) -> Self {
        Self {
            plan: Arc::new(plan),
            probe: Arc::new(Probe::default()),
            spawn_fails: false,
            rejects: None,
        }
    }

    /// Every job completes after `ms`.
    pub fn uniform(ms: u64) -> Self {
        Self::new(move |_| Script::after(ms))
    }

    /// Units refuse to accept a `process` frame for `label`; `post` errors.
    pub fn rejecting(mut self, label: &str) -> Self {
        self.rejects = Some(label.to_string());
        self
    }

    pub fn failing_spawn() -> Self {
        let mut backend = Self::uniform(0);
        backend.spawn_fails = true;
        backend
    }
}

pub struct ScriptedUnit {
    unit: UnitId,
    inbox: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: JoinHandle<()>,
    probe: Arc<Probe>,
    rejects: Option<String>,
}

impl UnitBackend for ScriptedBackend {
    type Unit = ScriptedUnit;

    fn spawn(&mut self, outlet: Outlet) -> Result<ScriptedUnit, DispatchError> {
        if self.spawn_fails {
            return Err(DispatchError::UnitSpawn("scripted spawn failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let unit = outlet.unit();
        let task = tokio::spawn(run_unit(
            outlet,
            rx,
            Arc::clone(&self.plan),
            Arc::clone(&self.probe),
        ));
        Ok(ScriptedUnit {
            unit,
            inbox: Some(tx),
            task,
            probe: Arc::clone(&self.probe),
            rejects: self.rejects.clone(),
        })
    }
}

impl ExecutionUnit for ScriptedUnit {
    fn post(&mut self, frame: Vec<u8>) -> Result<(), DispatchError> {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| DispatchError::Transport("unit terminated".into()))?;
        if let UnitMessage::Process(request) = UnitMessage::from_bytes(&frame)? {
            if self.rejects.as_deref() == Some(request.label.as_str()) {
                return Err(DispatchError::Transport(format!("unit refused {}", request.label)));
            }
            self.probe.assign(self.unit);
        }
        inbox
            .send(frame)
            .map_err(|_| DispatchError::Transport("unit inbox closed".into()))
    }

    fn terminate(&mut self) {
        if self.inbox.take().is_some() {
            self.task.abort();
            self.probe.clear(self.unit);
            self.probe.terminated.lock().unwrap().push(self.unit);
        }
    }
}

async fn run_unit(
    outlet: Outlet,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    plan: Plan,
    probe: Arc<Probe>,
) {
    let unit = outlet.unit();
    while let Some(frame) = inbox.recv().await {
        let request = match UnitMessage::from_bytes(&frame) {
            Ok(UnitMessage::Process(request)) => request,
            Ok(UnitMessage::Cleanup) => {
                let _ = outlet.reply(&UnitMessage::CleanupComplete);
                return;
            }
            _ => continue,
        };

        probe.started.lock().unwrap().push((unit, request.id));
        let script = plan(&request.label);
        tokio::time::sleep(script.delay).await;

        let mut reversed = request.payload.clone();
        reversed.reverse();
        let done = UnitMessage::complete(&request, Artifact::new(reversed));

        match script.reply {
            Reply::Complete => {
                probe.settle(unit);
                let _ = outlet.reply(&done);
            }
            Reply::Error(message) => {
                probe.settle(unit);
                let _ = outlet.reply(&UnitMessage::error(request.id, message));
            }
            Reply::Hang => std::future::pending::<()>().await,
            Reply::HangOnce => {
                let first = probe.hung_once.lock().unwrap().insert(request.label.clone());
                if first {
                    std::future::pending::<()>().await;
                }
                probe.settle(unit);
                let _ = outlet.reply(&done);
            }
            Reply::Fault(reason) => {
                outlet.fault(reason);
                return;
            }
            Reply::Duplicate => {
                probe.settle(unit);
                let _ = outlet.reply(&done);
                let _ = outlet.reply(&done);
            }
            Reply::ForeignIdFirst => {
                let foreign = ProcessRequest {
                    id: JobId(request.id.0 + 1000),
                    ..request.clone()
                };
                let _ = outlet.reply(&UnitMessage::complete(&foreign, Artifact::default()));
                probe.settle(unit);
                let _ = outlet.reply(&done);
            }
            Reply::Garbage => {
                let _ = outlet.reply_raw(vec![0xc1, 0xc1]);
            }
        }
    }
}

/// Drain every event published so far.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn payload(label: &str) -> Vec<u8> {
    label.as_bytes().to_vec()
}
