//! # Kernel
//!
//! Task creation, startup and the join barrier.
//!
//! A [`Kernel`] owns one execution port. Tasks are registered with
//! [`Kernel::create_task`] while the kernel is stopped; none of them runs
//! until [`Kernel::start`] releases all of them together, so no worker gets a
//! head start while the others are still being created.
//!
//! ## Startup Sequence
//!
//! ```text
//! Harness::run()
//!   ├─► Kernel::new(substrate)     ← Pick the port
//!   ├─► Kernel::create_task()      ← Register workers (×N, all held)
//!   ├─► Kernel::start()            ← Release every worker at once
//!   └─► kernel::join_all(handles)  ← Block until every worker terminated
//! ```
//!
//! Dropping a kernel that was never started releases the registered tasks
//! without running them.

use std::panic;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::arch::{self, Delay, Port, Substrate, TaskThread};
use crate::cell::SharedCell;
use crate::config::MAX_TASKS;
use crate::error::HarnessError;
use crate::sink::OutputSink;
use crate::task::{Lifecycle, LifecycleCell, WorkerReport, WorkerSpec, WorkerTask};

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

pub struct Kernel {
    port: Box<dyn Port>,
    task_count: usize,
    started: bool,
}

impl Kernel {
    pub fn new(substrate: Substrate) -> Self {
        debug!(%substrate, "kernel initialized");
        Self {
            port: arch::port(substrate),
            task_count: 0,
            started: false,
        }
    }

    /// Create a worker bound to `cell` and `sink`. It stays in `Created`
    /// until [`Kernel::start`].
    ///
    /// # Returns
    /// - `Ok(handle)`: The join handle of the new task.
    /// - `Err(TaskLimit)`: `MAX_TASKS` tasks already exist.
    /// - `Err(InvalidConfig)`: The kernel has already started.
    /// - `Err(Spawn)`: The host refused to create a thread.
    pub fn create_task(
        &mut self,
        spec: WorkerSpec,
        cell: Arc<SharedCell>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<TaskHandle, HarnessError> {
        if self.started {
            return Err(HarnessError::invalid("tasks cannot be created after start"));
        }
        if self.task_count >= MAX_TASKS {
            return Err(HarnessError::TaskLimit { max: MAX_TASKS });
        }

        let id = self.task_count;
        let name = spec.name.clone();
        let priority = spec.priority;
        let lifecycle = Arc::new(LifecycleCell::new());

        let worker = WorkerTask::new(id, spec, cell, sink);
        let state = Arc::clone(&lifecycle);
        let thread = self.port.spawn(
            id,
            &name,
            priority,
            Box::new(move || {
                state.set(Lifecycle::Running);
                let _terminated = TerminateOnExit(state);
                worker.run()
            }),
        )?;

        self.task_count += 1;
        trace!(task = id, %name, priority, "task created");
        Ok(TaskHandle {
            id,
            name,
            lifecycle,
            thread,
        })
    }

    /// Release every created task. Calling it twice has no further effect.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        debug!(tasks = self.task_count, "kernel started");
        self.port.start();
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if !self.started && self.task_count > 0 {
            debug!(tasks = self.task_count, "kernel dropped before start, releasing tasks");
            self.port.abort();
        }
    }
}

/// Marks the task Terminated however its body ends, panics included.
struct TerminateOnExit(Arc<LifecycleCell>);

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        self.0.set(Lifecycle::Terminated);
    }
}

// ---------------------------------------------------------------------------
// Join barrier
// ---------------------------------------------------------------------------

/// Join handle of one task.
pub struct TaskHandle {
    id: usize,
    name: String,
    lifecycle: Arc<LifecycleCell>,
    thread: TaskThread,
}

impl TaskHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }

    /// Block until the task terminates. `None` if it was released without
    /// running. A panic inside the worker is resumed on the caller.
    pub fn join(self) -> Option<WorkerReport> {
        match self.thread.join() {
            Ok(report) => report,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Wait for every task, in creation order. When this returns, no worker is
/// running and every write it made is visible to the caller.
pub fn join_all(handles: Vec<TaskHandle>) -> Vec<WorkerReport> {
    handles.into_iter().filter_map(TaskHandle::join).collect()
}

// ---------------------------------------------------------------------------
// Current-task services
// ---------------------------------------------------------------------------

/// Delay the calling task (busy wait or sleep).
#[inline]
pub fn delay(delay: Delay) {
    arch::delay(delay);
}

/// Voluntarily give up the CPU.
pub fn yield_task() {
    arch::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::AccessStrategy;
    use crate::sink::{Channel, RecordingSink, SinkError};
    use crate::task::Behavior;

    fn counter_spec(name: &str, iterations: u32) -> WorkerSpec {
        WorkerSpec {
            name: name.into(),
            priority: 5,
            behavior: Behavior::Counter { iterations },
        }
    }

    fn cell() -> Arc<SharedCell> {
        Arc::new(SharedCell::new(0, AccessStrategy::Synchronized))
    }

    #[test]
    fn test_tasks_wait_for_start() {
        let cell = cell();
        let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
        let mut kernel = Kernel::new(Substrate::Native);
        let handle = kernel
            .create_task(counter_spec("a", 100), Arc::clone(&cell), sink)
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(handle.lifecycle(), Lifecycle::Created);
        assert_eq!(cell.read(), 0);

        kernel.start();
        let report = handle.join().unwrap();
        assert_eq!(report.operations, 100);
        assert_eq!(cell.read(), 100);
    }

    #[test]
    fn test_join_all_returns_reports_in_creation_order() {
        for substrate in [Substrate::Native, Substrate::stepped(7)] {
            let cell = cell();
            let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
            let mut kernel = Kernel::new(substrate);
            let handles: Vec<TaskHandle> = ["a", "b", "c"]
                .into_iter()
                .map(|name| {
                    let spec = counter_spec(name, 500);
                    kernel
                        .create_task(spec, Arc::clone(&cell), Arc::clone(&sink))
                        .unwrap()
                })
                .collect();
            kernel.start();
            let reports = join_all(handles);
            let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, ["a", "b", "c"], "{substrate}");
            assert_eq!(cell.read(), 1_500, "{substrate}");
        }
    }

    #[test]
    fn test_terminated_after_join() {
        let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
        let mut kernel = Kernel::new(Substrate::stepped(1));
        let handle = kernel.create_task(counter_spec("a", 10), cell(), sink).unwrap();
        let lifecycle = Arc::clone(&handle.lifecycle);
        kernel.start();
        assert!(handle.join().is_some());
        assert_eq!(lifecycle.get(), Lifecycle::Terminated);
    }

    #[test]
    fn test_task_limit() {
        let cell = cell();
        let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
        let mut kernel = Kernel::new(Substrate::stepped(1));
        let mut handles = Vec::new();
        for i in 0..MAX_TASKS {
            let spec = counter_spec(&format!("t{i}"), 1);
            handles.push(
                kernel
                    .create_task(spec, Arc::clone(&cell), Arc::clone(&sink))
                    .unwrap(),
            );
        }
        let err = kernel
            .create_task(counter_spec("extra", 1), Arc::clone(&cell), sink)
            .err();
        assert!(matches!(err, Some(HarnessError::TaskLimit { max: MAX_TASKS })));
        kernel.start();
        assert_eq!(join_all(handles).len(), MAX_TASKS);
        assert_eq!(cell.read(), MAX_TASKS as u32);
    }

    #[test]
    fn test_create_after_start_is_rejected() {
        let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
        let mut kernel = Kernel::new(Substrate::Native);
        kernel.start();
        let err = kernel.create_task(counter_spec("late", 1), cell(), sink).err();
        assert!(matches!(err, Some(HarnessError::InvalidConfig { .. })));
    }

    #[test]
    fn test_drop_before_start_runs_nothing() {
        for substrate in [Substrate::Native, Substrate::stepped(2)] {
            let cell = cell();
            let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
            let mut kernel = Kernel::new(substrate);
            let handle = kernel
                .create_task(counter_spec("a", 100), Arc::clone(&cell), sink)
                .unwrap();
            drop(kernel);
            assert!(handle.join().is_none());
            assert_eq!(cell.read(), 0);
        }
    }

    struct BrokenSink;

    impl OutputSink for BrokenSink {
        fn ready(&self, _channel: Channel) -> Result<(), SinkError> {
            Ok(())
        }

        fn set_channel(&self, _channel: Channel, _on: bool) {
            panic!("sink wiring broke");
        }
    }

    #[test]
    fn test_panicking_worker_still_terminates() {
        use crate::arch::Delay;
        use crate::task::{PatternStep, Publish, Sampling};

        let spec = WorkerSpec {
            name: "doomed".into(),
            priority: 5,
            behavior: Behavior::Pattern {
                script: vec![PatternStep {
                    value: 0x01,
                    settle: Delay::NONE,
                    hold: Delay::NONE,
                }],
                iterations: 1,
                publish: Publish {
                    sampling: Sampling::Atomic,
                    channel_delay: Delay::NONE,
                },
            },
        };
        let mut kernel = Kernel::new(Substrate::stepped(4));
        let handle = kernel.create_task(spec, cell(), Arc::new(BrokenSink)).unwrap();
        let lifecycle = Arc::clone(&handle.lifecycle);
        kernel.start();

        let joined = panic::catch_unwind(panic::AssertUnwindSafe(|| handle.join()));
        assert!(joined.is_err());
        assert_eq!(lifecycle.get(), Lifecycle::Terminated);
    }
}
