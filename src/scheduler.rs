//! # Scheduler
//!
//! Core logic of the stepped substrate: a preemptive, priority-based,
//! time-sliced scheduler for a single virtual core. It holds no threads and
//! no locks; [`crate::arch::stepped`] drives it from the task threads.
//!
//! ## Time
//!
//! Time is measured in ticks. The running task is charged one tick per
//! primitive cell operation and one tick per `TICK_MICROS` of busy delay.
//! Sleeping tasks do not consume ticks; when nothing is runnable the clock
//! jumps straight to the earliest wake-up.
//!
//! ## Scheduling Algorithm
//!
//! 1. **Charge ticks** to the running task and decrement its slice.
//! 2. **Wake sleepers** whose wake tick has passed.
//! 3. **Slice expired** (or a higher-priority task woke): set `needs_reschedule`.
//! 4. **Select next task**: highest priority Ready task, round-robin among
//!    equals starting after the previous one.
//! 5. **New slice**: `1..=2×time_slice` ticks drawn from the seeded PRNG, so
//!    the preemption points move from seed to seed.
//!
//! Preemption can be masked by the caller (critical sections): ticks are
//! still charged, but the switch stays pending until the mask is lifted.

use crate::config::MAX_TASKS;
use crate::error::HarnessError;
use crate::rng::DetRng;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Dispatch state of a task.
///
/// ```text
///   ┌─────────┐  start()  ┌─────────┐   schedule()    ┌─────────┐
///   │ Created │ ────────► │  Ready  │ ──────────────► │ Running │
///   └─────────┘           └─────────┘                 └─────────┘
///                           ▲     ▲   slice expired      │   │
///                           │     └──────────────────────┘   │
///                           │  wake tick                     │ sleep()
///                         ┌─────────┐                        │
///                         │ Blocked │ ◄──────────────────────┘
///                         └─────────┘
///   Running ── terminate() ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered but not yet released.
    Created,
    /// Waiting for the CPU.
    Ready,
    /// Owns the CPU.
    Running,
    /// Sleeping until `wake_tick`.
    Blocked,
    /// Finished; never scheduled again.
    Terminated,
}

/// Per-task bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock {
    pub id: usize,
    pub state: TaskState,
    /// Higher runs first. Workers of one harness run share one priority.
    pub priority: u8,
    /// Ticks left in the current slice.
    pub ticks_remaining: u32,
    /// Tick at which a Blocked task becomes Ready.
    pub wake_tick: u64,
    /// Times this task lost the CPU to slice expiry.
    pub preemptions: u32,
}

impl TaskControlBlock {
    pub const EMPTY: Self = Self {
        id: 0,
        state: TaskState::Terminated,
        priority: 0,
        ticks_remaining: 0,
        wake_tick: 0,
        preemptions: 0,
    };

    fn init(&mut self, id: usize, priority: u8) {
        *self = Self {
            id,
            state: TaskState::Created,
            priority,
            ..Self::EMPTY
        };
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Ready
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// Scheduler state for one virtual core.
pub struct Scheduler {
    /// Fixed-size task table; slots `0..task_count` are in use.
    pub tasks: [TaskControlBlock; MAX_TASKS],
    pub task_count: usize,
    /// Task owning the CPU, `None` before start and after everyone finished.
    pub current_task: Option<usize>,
    /// Monotonic virtual clock.
    pub tick_count: u64,
    /// Set when the running task should give up the CPU.
    pub needs_reschedule: bool,
    /// Number of times the CPU changed hands.
    pub switches: u64,
    /// Released without running (startup failed).
    pub aborted: bool,
    time_slice: u32,
    rng: DetRng,
}

impl Scheduler {
    /// Scheduler whose slice lengths average `time_slice` ticks.
    pub const fn new(seed: u64, time_slice: u32) -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            task_count: 0,
            current_task: None,
            tick_count: 0,
            needs_reschedule: false,
            switches: 0,
            aborted: false,
            time_slice: if time_slice == 0 { 1 } else { time_slice },
            rng: DetRng::new(seed),
        }
    }

    /// Register a task in the Created state.
    pub fn create_task(&mut self, priority: u8) -> Result<usize, HarnessError> {
        if self.task_count >= MAX_TASKS {
            return Err(HarnessError::TaskLimit { max: MAX_TASKS });
        }
        let id = self.task_count;
        self.tasks[id].init(id, priority);
        self.task_count += 1;
        Ok(id)
    }

    /// Make every created task Ready and dispatch the first one.
    pub fn start(&mut self) -> Option<usize> {
        for tcb in &mut self.tasks[..self.task_count] {
            if tcb.state == TaskState::Created {
                tcb.state = TaskState::Ready;
            }
        }
        self.schedule()
    }

    /// Charge up to `ticks` to the running task and return how many were
    /// charged. Unmasked, charging stops when the slice runs out; masked, all
    /// ticks are charged and an expired slice only pends the switch.
    pub fn tick(&mut self, ticks: u64, masked: bool) -> u64 {
        let Some(current) = self.current_task else {
            return ticks;
        };

        let tcb = &mut self.tasks[current];
        let charged = if masked {
            ticks
        } else {
            ticks.min(u64::from(tcb.ticks_remaining))
        };
        // `charged` fits in u32 whenever it is bounded by the slice.
        let used = u32::try_from(charged).unwrap_or(u32::MAX);
        tcb.ticks_remaining = tcb.ticks_remaining.saturating_sub(used);
        let expired = tcb.ticks_remaining == 0;
        let priority = tcb.priority;

        self.tick_count += charged;
        self.wake_sleepers();

        let outranked = self.tasks[..self.task_count]
            .iter()
            .any(|t| t.is_runnable() && t.priority > priority);
        if expired || outranked {
            self.needs_reschedule = true;
        }
        charged
    }

    /// Take the CPU away from the running task and dispatch the next one.
    pub fn preempt(&mut self) -> Option<usize> {
        if let Some(current) = self.current_task {
            self.tasks[current].preemptions += 1;
        }
        self.schedule()
    }

    /// Put the running task to sleep for `ticks` (0 means yield).
    pub fn block_current(&mut self, ticks: u64) {
        if let Some(current) = self.current_task {
            let wake = self.tick_count + ticks;
            let tcb = &mut self.tasks[current];
            tcb.state = TaskState::Blocked;
            tcb.wake_tick = wake;
        }
    }

    /// Retire task `id`. If it owned the CPU, dispatch the next task.
    pub fn terminate(&mut self, id: usize) {
        if id >= self.task_count {
            return;
        }
        self.tasks[id].state = TaskState::Terminated;
        if self.current_task == Some(id) {
            self.schedule();
        }
    }

    /// Select the next task to run.
    ///
    /// Picks the highest-priority Ready task, scanning round-robin from the
    /// task after the previous one so equal priorities take turns. If nothing
    /// is Ready but someone sleeps, the clock jumps to the earliest wake-up.
    ///
    /// # Returns
    /// The new running task, or `None` if every task has terminated.
    pub fn schedule(&mut self) -> Option<usize> {
        let prev = self.current_task;
        if let Some(p) = prev {
            if self.tasks[p].state == TaskState::Running {
                self.tasks[p].state = TaskState::Ready;
            }
        }

        self.wake_sleepers();
        if !self.any_ready() {
            // Idle: skip straight to the next wake-up.
            let next_wake = self.tasks[..self.task_count]
                .iter()
                .filter(|t| t.state == TaskState::Blocked)
                .map(|t| t.wake_tick)
                .min();
            if let Some(wake) = next_wake {
                self.tick_count = self.tick_count.max(wake);
                self.wake_sleepers();
            }
        }

        let start = prev.map_or(0, |p| p + 1);
        let mut best: Option<usize> = None;
        for offset in 0..self.task_count {
            let i = (start + offset) % self.task_count;
            if !self.tasks[i].is_runnable() {
                continue;
            }
            if best.map_or(true, |b| self.tasks[i].priority > self.tasks[b].priority) {
                best = Some(i);
            }
        }

        if let Some(next) = best {
            let slice = self.next_slice();
            let tcb = &mut self.tasks[next];
            tcb.state = TaskState::Running;
            tcb.ticks_remaining = slice;
            if prev != Some(next) {
                self.switches += 1;
            }
        }

        self.current_task = best;
        self.needs_reschedule = false;
        best
    }

    /// True once every registered task has terminated.
    pub fn all_terminated(&self) -> bool {
        self.tasks[..self.task_count]
            .iter()
            .all(|t| t.state == TaskState::Terminated)
    }

    fn any_ready(&self) -> bool {
        self.tasks[..self.task_count].iter().any(|t| t.is_runnable())
    }

    fn wake_sleepers(&mut self) {
        let now = self.tick_count;
        for tcb in &mut self.tasks[..self.task_count] {
            if tcb.state == TaskState::Blocked && tcb.wake_tick <= now {
                tcb.state = TaskState::Ready;
            }
        }
    }

    fn next_slice(&mut self) -> u32 {
        let span = u64::from(self.time_slice) * 2;
        u32::try_from(1 + self.rng.next_below(span)).unwrap_or(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
