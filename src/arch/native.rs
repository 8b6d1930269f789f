//! # Native Port
//!
//! Each task is an OS thread. Threads are created parked behind a start gate
//! so that every worker begins at once when the kernel starts; after that the
//! host scheduler alone decides the interleaving.

use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::{Port, TaskBody, TaskThread};
use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Aborted,
}

#[derive(Debug)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            changed: Condvar::new(),
        }
    }

    /// Block until the gate leaves `Closed`. Returns true if it opened.
    fn pass(&self) -> bool {
        let mut state = self.state.lock();
        while *state == GateState::Closed {
            self.changed.wait(&mut state);
        }
        *state == GateState::Open
    }

    fn set(&self, to: GateState) {
        let mut state = self.state.lock();
        if *state == GateState::Closed {
            *state = to;
            self.changed.notify_all();
        }
    }
}

/// Port backed by host threads.
#[derive(Debug)]
pub struct NativePort {
    gate: Arc<Gate>,
}

impl NativePort {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Gate::new()),
        }
    }
}

impl Default for NativePort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for NativePort {
    fn spawn(
        &self,
        id: usize,
        name: &str,
        _priority: u8,
        body: TaskBody,
    ) -> Result<TaskThread, HarnessError> {
        let gate = Arc::clone(&self.gate);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                if !gate.pass() {
                    trace!(task = id, "released without running");
                    return None;
                }
                Some(body())
            })
            .map_err(|source| HarnessError::Spawn {
                name: name.to_owned(),
                source,
            })
    }

    fn start(&self) {
        self.gate.set(GateState::Open);
    }

    fn abort(&self) {
        self.gate.set(GateState::Aborted);
    }
}
