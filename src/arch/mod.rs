//! # Execution Substrate Layer
//!
//! Boundary between the harness and whatever actually runs the workers.
//! Two ports sit behind the [`Port`] trait:
//!
//! - [`native`]: one OS thread per task. The host scheduler preempts at
//!   arbitrary instruction boundaries; nothing here controls the interleaving.
//! - [`stepped`]: a single-core, tick-driven scheduler (see
//!   [`crate::scheduler`]) where every primitive cell operation is one tick and
//!   time slices are drawn from a seeded PRNG. Same seed, same interleaving.
//!
//! Worker code never knows which port runs it. It reaches the substrate only
//! through [`preempt_point`], [`delay`] and [`yield_now`], which dispatch on a
//! thread-local context installed by the stepped port.

pub mod native;
pub mod stepped;

use core::cell::RefCell;
use core::fmt;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{DEFAULT_TIME_SLICE, TICK_MICROS};
use crate::error::HarnessError;
use crate::task::WorkerReport;

// ---------------------------------------------------------------------------
// Substrate selection
// ---------------------------------------------------------------------------

/// Which runtime executes the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substrate {
    /// OS threads under the host's preemptive scheduler.
    Native,
    /// Deterministic single-core scheduler.
    Stepped {
        /// Seed for time-slice lengths.
        seed: u64,
        /// Mean time slice in ticks.
        time_slice: u32,
    },
}

impl Substrate {
    /// Stepped substrate with the default time slice.
    pub const fn stepped(seed: u64) -> Self {
        Self::Stepped {
            seed,
            time_slice: DEFAULT_TIME_SLICE,
        }
    }
}

impl Default for Substrate {
    fn default() -> Self {
        Self::Native
    }
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Stepped { seed, time_slice } => {
                write!(f, "stepped(seed={seed}, slice={time_slice})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Delays
// ---------------------------------------------------------------------------

/// An artificial delay inside a worker.
///
/// The two kinds differ in what the rest of the system sees: a busy wait keeps
/// the processor (the task stays runnable and can only lose the CPU through
/// preemption), a sleep blocks the task and hands the processor to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Spin for the duration without yielding.
    Busy(Duration),
    /// Block for the duration, yielding the processor.
    Sleep(Duration),
}

impl Delay {
    /// No delay at all.
    pub const NONE: Delay = Delay::Busy(Duration::ZERO);

    pub const fn busy_micros(micros: u64) -> Self {
        Self::Busy(Duration::from_micros(micros))
    }

    pub const fn sleep_millis(millis: u64) -> Self {
        Self::Sleep(Duration::from_millis(millis))
    }

    pub const fn duration(self) -> Duration {
        match self {
            Self::Busy(d) | Self::Sleep(d) => d,
        }
    }

    /// Length of the delay in scheduler ticks, rounded down.
    pub fn ticks(self) -> u64 {
        let micros = u64::try_from(self.duration().as_micros()).unwrap_or(u64::MAX);
        micros / TICK_MICROS
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::NONE
    }
}

// ---------------------------------------------------------------------------
// Port interface
// ---------------------------------------------------------------------------

/// Body of a task as handed to a port.
pub(crate) type TaskBody = Box<dyn FnOnce() -> WorkerReport + Send + 'static>;

/// A task's thread. Yields `None` if the task was released without running.
pub(crate) type TaskThread = JoinHandle<Option<WorkerReport>>;

/// Operations a substrate provides to the kernel.
pub(crate) trait Port: Send + Sync {
    /// Create task `id`. The body must not run before [`Port::start`].
    fn spawn(
        &self,
        id: usize,
        name: &str,
        priority: u8,
        body: TaskBody,
    ) -> Result<TaskThread, HarnessError>;

    /// Release every created task.
    fn start(&self);

    /// Release every created task without running its body.
    fn abort(&self);
}

/// Build the port for `substrate`.
pub(crate) fn port(substrate: Substrate) -> Box<dyn Port> {
    match substrate {
        Substrate::Native => Box::new(native::NativePort::new()),
        Substrate::Stepped { seed, time_slice } => {
            Box::new(stepped::SteppedPort::new(seed, time_slice))
        }
    }
}

// ---------------------------------------------------------------------------
// Current-task hooks
// ---------------------------------------------------------------------------

thread_local! {
    static STEPPED: RefCell<Option<stepped::TaskContext>> = const { RefCell::new(None) };
}

pub(crate) fn install_stepped(cx: stepped::TaskContext) {
    STEPPED.with(|slot| *slot.borrow_mut() = Some(cx));
}

/// Run `f` against the stepped context of this thread, if there is one.
fn with_stepped(f: impl FnOnce(&stepped::TaskContext)) -> bool {
    STEPPED.with(|slot| match slot.borrow().as_ref() {
        Some(cx) => {
            f(cx);
            true
        }
        None => false,
    })
}

/// Mark the end of one primitive operation. Under the stepped port this is
/// one tick and the task may lose the CPU here; natively it does nothing.
#[inline]
pub fn preempt_point() {
    with_stepped(|cx| cx.advance(1));
}

/// Perform `delay` in the current execution context.
pub fn delay(delay: Delay) {
    if delay.duration().is_zero() {
        return;
    }
    match delay {
        Delay::Busy(d) => {
            if !with_stepped(|cx| cx.advance(delay.ticks())) {
                spin_for(d);
            }
        }
        Delay::Sleep(d) => {
            if !with_stepped(|cx| cx.sleep(delay.ticks())) {
                std::thread::sleep(d);
            }
        }
    }
}

/// Give up the rest of the current time slice.
pub fn yield_now() {
    if !with_stepped(|cx| cx.sleep(0)) {
        std::thread::yield_now();
    }
}

/// Take a context switch that was pended while preemption was masked.
pub(crate) fn on_critical_exit() {
    with_stepped(|cx| cx.advance(0));
}

fn spin_for(d: Duration) {
    let deadline = Instant::now() + d;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_ticks() {
        assert_eq!(Delay::busy_micros(3000).ticks(), 3000);
        assert_eq!(Delay::sleep_millis(80).ticks(), 80_000);
        assert_eq!(Delay::NONE.ticks(), 0);
    }

    #[test]
    fn test_hooks_are_inert_outside_stepped_tasks() {
        let start = Instant::now();
        preempt_point();
        delay(Delay::busy_micros(200));
        yield_now();
        assert!(start.elapsed() >= Duration::from_micros(200));
    }
}
