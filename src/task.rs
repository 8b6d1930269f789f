//! # Worker Tasks
//!
//! Defines what a worker does to the shared cell. Every worker is described
//! by a [`WorkerSpec`] and runs a fixed, finite workload before terminating.
//! Workers are never cancelled.
//!
//! ## Behaviors
//!
//! | Behavior | Per iteration | Shared-state effect |
//! |----------|---------------|---------------------|
//! | `Counter` | `increment()` once | lost updates |
//! | `Pattern` | write each script pattern, publish channels | torn snapshots |
//! | `RandomToggle` | toggle a PRNG-chosen channel bit, publish | lost toggles |
//!
//! ## Publishing
//!
//! With [`Sampling::Independent`] the cell is re-read once per channel with a
//! delay after each channel, so a concurrent writer can change the value
//! between the reads and the published frame may never have been written as a
//! whole. [`Sampling::Atomic`] reads the cell once per pass.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::arch::Delay;
use crate::cell::SharedCell;
use crate::config::CHANNEL_COUNT;
use crate::kernel;
use crate::rng::DetRng;
use crate::sink::{Channel, Frame, OutputSink};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a worker: `Created → Running → Terminated`, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Terminated,
}

/// Lifecycle shared between a running worker and its handle.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Created as u8))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        match self.0.load(Ordering::Acquire) {
            0 => Lifecycle::Created,
            1 => Lifecycle::Running,
            _ => Lifecycle::Terminated,
        }
    }

    pub(crate) fn set(&self, state: Lifecycle) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Worker configuration
// ---------------------------------------------------------------------------

/// How a publish pass samples the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampling {
    /// One read per channel, delays in between.
    #[default]
    Independent,
    /// One read per pass.
    Atomic,
}

/// Parameters of a publish pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish {
    pub sampling: Sampling,
    /// Delay after each channel is driven.
    pub channel_delay: Delay,
}

/// One write of a pattern script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternStep {
    /// Bit pattern written to the cell as a whole.
    pub value: u32,
    /// Delay between the write and the publish pass.
    pub settle: Delay,
    /// Delay after the publish pass.
    pub hold: Delay,
}

/// What a worker does on each iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    Counter {
        iterations: u32,
    },
    Pattern {
        script: Vec<PatternStep>,
        iterations: u32,
        publish: Publish,
    },
    RandomToggle {
        iterations: u32,
        seed: u64,
        publish: Publish,
        hold: Delay,
    },
}

/// Static description of a worker, set at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    /// Scheduling priority. Workers racing each other must share one priority
    /// so the scheduler time-slices between them.
    pub priority: u8,
    pub behavior: Behavior,
}

/// What a worker did, returned through the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub name: String,
    /// Cell operations issued (increments, pattern writes, toggles).
    pub operations: u64,
    /// Frames published, in order.
    pub frames: Vec<Frame>,
    /// XOR of every mask this worker toggled.
    pub toggled: u32,
    /// Cell value the worker saw as it finished.
    pub observed_at_exit: u32,
}

impl WorkerReport {
    pub fn new(id: usize, name: String) -> Self {
        Self {
            id,
            name,
            operations: 0,
            frames: Vec::new(),
            toggled: 0,
            observed_at_exit: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Random toggles
// ---------------------------------------------------------------------------

/// Endless sequence of channels to toggle, fixed by the seed.
#[derive(Debug, Clone)]
pub struct ToggleSequence {
    rng: DetRng,
}

impl ToggleSequence {
    pub const fn new(seed: u64) -> Self {
        Self {
            rng: DetRng::new(seed),
        }
    }

    /// XOR of the masks of the first `iterations` toggles.
    pub fn combined_mask(seed: u64, iterations: u32) -> u32 {
        Self::new(seed)
            .take(iterations as usize)
            .fold(0, |mask, channel| mask ^ channel.mask())
    }
}

impl Iterator for ToggleSequence {
    type Item = Channel;

    fn next(&mut self) -> Option<Channel> {
        // The draw is below CHANNEL_COUNT, so the index always exists.
        let index = self.rng.next_below(CHANNEL_COUNT as u64) as usize;
        Channel::new(index)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A worker bound to the shared cell and the output sink.
pub struct WorkerTask {
    id: usize,
    spec: WorkerSpec,
    cell: Arc<SharedCell>,
    sink: Arc<dyn OutputSink>,
}

impl WorkerTask {
    pub fn new(
        id: usize,
        spec: WorkerSpec,
        cell: Arc<SharedCell>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            id,
            spec,
            cell,
            sink,
        }
    }

    /// Run the whole workload and report.
    pub fn run(self) -> WorkerReport {
        info!(worker = %self.spec.name, "worker started");
        let mut report = WorkerReport::new(self.id, self.spec.name.clone());

        match &self.spec.behavior {
            Behavior::Counter { iterations } => {
                for _ in 0..*iterations {
                    self.cell.increment();
                    report.operations += 1;
                }
            }
            Behavior::Pattern {
                script,
                iterations,
                publish,
            } => {
                for _ in 0..*iterations {
                    for step in script {
                        self.cell.write(step.value);
                        report.operations += 1;
                        kernel::delay(step.settle);
                        report.frames.push(self.publish(publish));
                        kernel::delay(step.hold);
                    }
                }
            }
            Behavior::RandomToggle {
                iterations,
                seed,
                publish,
                hold,
            } => {
                for channel in ToggleSequence::new(*seed).take(*iterations as usize) {
                    self.cell.toggle(channel.mask());
                    report.operations += 1;
                    report.toggled ^= channel.mask();
                    report.frames.push(self.publish(publish));
                    kernel::delay(*hold);
                }
            }
        }

        report.observed_at_exit = self.cell.read();
        info!(
            worker = %report.name,
            operations = report.operations,
            observed = report.observed_at_exit,
            "worker finished"
        );
        report
    }

    /// Drive every channel from the cell and hand the frame to the sink.
    fn publish(&self, publish: &Publish) -> Frame {
        let mut frame = Frame::EMPTY;
        let snapshot = match publish.sampling {
            Sampling::Atomic => Some(Frame::from_bits(self.cell.read())),
            Sampling::Independent => None,
        };
        for channel in Channel::ALL {
            let on = match snapshot {
                Some(snapshot) => snapshot.is_on(channel),
                None => self.cell.read() & channel.mask() != 0,
            };
            self.sink.set_channel(channel, on);
            frame = frame.with(channel, on);
            kernel::delay(publish.channel_delay);
        }
        debug!(worker = %self.spec.name, %frame, "frame published");
        self.sink.frame(self.id, frame);
        frame
    }
}

// ---------------------------------------------------------------------------
// Unit tests (single worker, no contention)
// ---------------------------------------------------------------------------
