//! # Stepped Port
//!
//! Runs every task on its own thread but lets exactly one of them execute at
//! a time: the one the [`Scheduler`] has marked Running. A task thread hands
//! the CPU over at its preemption points (every primitive cell operation,
//! busy delays, sleeps) and waits on a condition variable until the scheduler
//! dispatches it again.
//!
//! Because slice lengths come from a seeded PRNG and nothing else influences
//! dispatch, a run is a pure function of the seed and the workload.

use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use super::{install_stepped, Port, TaskBody, TaskThread};
use crate::error::HarnessError;
use crate::scheduler::Scheduler;
use crate::sync;

/// Scheduler plus the signal used to hand the CPU between task threads.
pub(crate) struct Shared {
    sched: Mutex<Scheduler>,
    turn: Condvar,
}

impl Shared {
    fn wait_turn(&self, sched: &mut MutexGuard<'_, Scheduler>, id: usize) {
        while sched.current_task != Some(id) && !sched.aborted {
            self.turn.wait(sched);
        }
    }

    /// Dispatch the next task if the scheduler asks for it.
    fn switch_if_needed(&self, sched: &mut MutexGuard<'_, Scheduler>, id: usize) {
        if !sched.needs_reschedule {
            return;
        }
        let next = sched.preempt();
        if next != Some(id) {
            trace!(from = id, to = ?next, tick = sched.tick_count, "preempted");
            self.turn.notify_all();
        }
    }

    /// First dispatch of task `id`. Returns false if the run was aborted.
    fn first_turn(&self, id: usize) -> bool {
        let mut sched = self.sched.lock();
        self.wait_turn(&mut sched, id);
        !sched.aborted
    }

    /// Charge `ticks` of work to task `id`, giving up the CPU whenever its
    /// slice runs out. Inside a critical section the ticks are charged in one
    /// go and an expired slice is left pending.
    fn advance(&self, id: usize, mut ticks: u64) {
        let masked = sync::in_critical_section();
        let mut sched = self.sched.lock();
        loop {
            self.wait_turn(&mut sched, id);
            if sched.aborted {
                return;
            }
            ticks -= sched.tick(ticks, masked);
            if !masked {
                self.switch_if_needed(&mut sched, id);
            }
            if ticks == 0 {
                break;
            }
        }
        self.wait_turn(&mut sched, id);
    }

    /// Block task `id` for `ticks` and run someone else meanwhile.
    fn sleep(&self, id: usize, ticks: u64) {
        debug_assert!(
            !sync::in_critical_section(),
            "sleeping inside a critical section"
        );
        let mut sched = self.sched.lock();
        self.wait_turn(&mut sched, id);
        if sched.aborted {
            return;
        }
        sched.block_current(ticks);
        let next = sched.schedule();
        if next != Some(id) {
            trace!(task = id, to = ?next, ticks, "sleeping");
            self.turn.notify_all();
        }
        self.wait_turn(&mut sched, id);
    }

    fn exit(&self, id: usize) {
        let mut sched = self.sched.lock();
        sched.terminate(id);
        trace!(
            task = id,
            tick = sched.tick_count,
            switches = sched.switches,
            "task exited"
        );
        self.turn.notify_all();
    }
}

/// Handle a task thread keeps to reach its scheduler.
#[derive(Clone)]
pub(crate) struct TaskContext {
    shared: Arc<Shared>,
    id: usize,
}

impl TaskContext {
    pub(crate) fn advance(&self, ticks: u64) {
        self.shared.advance(self.id, ticks);
    }

    pub(crate) fn sleep(&self, ticks: u64) {
        self.shared.sleep(self.id, ticks);
    }
}

/// Retires the task however its body ends, so a panicking worker cannot
/// leave the others waiting for a CPU that never comes back.
struct ExitGuard {
    shared: Arc<Shared>,
    id: usize,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.exit(self.id);
    }
}

/// Port backed by the deterministic scheduler.
pub struct SteppedPort {
    shared: Arc<Shared>,
}

impl SteppedPort {
    pub fn new(seed: u64, time_slice: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                sched: Mutex::new(Scheduler::new(seed, time_slice)),
                turn: Condvar::new(),
            }),
        }
    }

    /// Virtual clock of the underlying scheduler.
    pub fn tick_count(&self) -> u64 {
        self.shared.sched.lock().tick_count
    }
}

impl Port for SteppedPort {
    fn spawn(
        &self,
        id: usize,
        name: &str,
        priority: u8,
        body: TaskBody,
    ) -> Result<TaskThread, HarnessError> {
        let tid = self.shared.sched.lock().create_task(priority)?;
        debug_assert_eq!(tid, id, "kernel and scheduler disagree on task ids");

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                install_stepped(TaskContext {
                    shared: Arc::clone(&shared),
                    id: tid,
                });
                let _exit = ExitGuard {
                    shared: Arc::clone(&shared),
                    id: tid,
                };
                if !shared.first_turn(tid) {
                    return None;
                }
                Some(body())
            })
            .map_err(|source| {
                // The slot exists but no thread will ever run it.
                self.shared.sched.lock().terminate(tid);
                HarnessError::Spawn {
                    name: name.to_owned(),
                    source,
                }
            })
    }

    fn start(&self) {
        let mut sched = self.shared.sched.lock();
        let first = sched.start();
        trace!(first = ?first, tasks = sched.task_count, "stepped scheduler started");
        self.shared.turn.notify_all();
    }

    fn abort(&self) {
        let mut sched = self.shared.sched.lock();
        sched.aborted = true;
        self.shared.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{self, Delay};
    use crate::task::WorkerReport;

    #[test]
    fn test_only_one_task_runs_at_a_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let port = SteppedPort::new(3, 4);
        let inside = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for id in 0..3 {
            let inside = Arc::clone(&inside);
            let body: TaskBody = Box::new(move || {
                for _ in 0..200 {
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    arch::preempt_point();
                }
                WorkerReport::new(id, format!("t{id}"))
            });
            threads.push(port.spawn(id, &format!("t{id}"), 5, body).unwrap());
        }
        port.start();
        for t in threads {
            assert!(t.join().unwrap().is_some());
        }
        assert_eq!(port.tick_count(), 600);
    }

    #[test]
    fn test_sleep_advances_virtual_time_only() {
        let port = SteppedPort::new(1, 8);
        let body: TaskBody = Box::new(|| {
            arch::delay(Delay::sleep_millis(500));
            arch::delay(Delay::busy_micros(10));
            WorkerReport::new(0, "sleeper".into())
        });
        let t = port.spawn(0, "sleeper", 5, body).unwrap();
        let started = std::time::Instant::now();
        port.start();
        assert!(t.join().unwrap().is_some());
        assert_eq!(port.tick_count(), 500_010);
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_abort_releases_waiting_tasks() {
        let port = SteppedPort::new(1, 8);
        let body: TaskBody = Box::new(|| -> WorkerReport { panic!("must not run") });
        let t = port.spawn(0, "t0", 5, body).unwrap();
        port.abort();
        assert!(t.join().unwrap().is_none());
    }

    #[test]
    fn test_yield_task_alternates_equal_priorities() {
        let port = SteppedPort::new(5, 1_000);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::new();
        for id in 0..2 {
            let order = Arc::clone(&order);
            let body: TaskBody = Box::new(move || {
                for _ in 0..3 {
                    order.lock().push(id);
                    crate::kernel::yield_task();
                }
                WorkerReport::new(id, format!("t{id}"))
            });
            threads.push(port.spawn(id, &format!("t{id}"), 5, body).unwrap());
        }
        port.start();
        for t in threads {
            assert!(t.join().unwrap().is_some());
        }
        // No tick is ever charged, so only the yields hand over the CPU.
        assert_eq!(*order.lock(), vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(port.tick_count(), 0);
    }
}
