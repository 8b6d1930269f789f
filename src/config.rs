//! # RaceLab Configuration
//!
//! Compile-time constants for the harness and the stepped scheduler, and the
//! [`HarnessConfig`] structure describing one run. The defaults reproduce the
//! reference demonstrations: two equal-priority workers doing 10 000 bare
//! increments each, and a red/green/blue LED pattern demo with 40 iterations
//! and millisecond-scale delays.

use std::collections::BTreeSet;

use crate::arch::{Delay, Substrate};
use crate::cell::AccessStrategy;
use crate::error::HarnessError;
use crate::outcome::Expected;
use crate::sink::Frame;
use crate::task::{Behavior, PatternStep, Publish, Sampling, ToggleSequence, WorkerSpec};

// ---------------------------------------------------------------------------
// Kernel limits
// ---------------------------------------------------------------------------

/// Maximum number of tasks one kernel can manage.
pub const MAX_TASKS: usize = 16;

/// Number of output channels (red, green, blue).
pub const CHANNEL_COUNT: usize = 3;

/// Virtual microseconds per stepped-scheduler tick. One primitive cell
/// operation costs one tick.
pub const TICK_MICROS: u64 = 1;

/// Mean stepped time slice in ticks. Actual slices are drawn from
/// `1..=2×DEFAULT_TIME_SLICE`.
pub const DEFAULT_TIME_SLICE: u32 = 32;

/// Priority shared by all workers. Equal priorities are what makes the
/// scheduler time-slice between them.
pub const WORKER_PRIORITY: u8 = 5;

// ---------------------------------------------------------------------------
// Counter demo
// ---------------------------------------------------------------------------

pub const DEFAULT_WORKER_COUNT: usize = 2;

pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Busy delay between the read and the write of an increment. Zero keeps the
/// window as narrow as the hardware makes it.
pub const DEFAULT_INTERLEAVE_DELAY_MICROS: u64 = 0;

/// Value of the shared cell before any worker runs.
pub const INITIAL_VALUE: u32 = 0;

// ---------------------------------------------------------------------------
// Pattern demo
// ---------------------------------------------------------------------------

pub const PATTERN_ITERATIONS: u32 = 40;

/// Busy delay after the first worker writes its pattern.
pub const SETTLE_A_MICROS: u64 = 2_000;

/// Busy delay after the second worker writes its pattern.
pub const SETTLE_B_MICROS: u64 = 1_500;

/// Busy delay after each channel is driven.
pub const CHANNEL_DELAY_MICROS: u64 = 3_000;

/// Sleeps after each publish pass: first worker (on, off), second (green, blue).
pub const HOLD_A_MILLIS: [u64; 2] = [80, 120];
pub const HOLD_B_MILLIS: [u64; 2] = [100, 140];

/// Final frame once every worker is done: blue steady, the rest off.
pub const PATTERN_FINALE: Frame = Frame::from_bits(0x04);

// ---------------------------------------------------------------------------
// Random toggle demo
// ---------------------------------------------------------------------------

pub const TOGGLE_ITERATIONS: u32 = 64;

/// Sleep after each toggle pass.
pub const TOGGLE_HOLD_MILLIS: u64 = 5;

/// Default race window of the toggle demo, in microseconds.
pub const TOGGLE_RACE_WINDOW_MICROS: u64 = 20;

pub const DEFAULT_SEED: u64 = 0x5EED;

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Which workload the workers run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    /// Every worker increments the cell `iterations_per_worker` times.
    Counter,
    /// Worker `i` runs `scripts[i % scripts.len()]` `iterations_per_worker`
    /// times.
    Pattern {
        scripts: Vec<Vec<PatternStep>>,
        publish: Publish,
    },
    /// Worker `i` toggles channels drawn from `ToggleSequence::new(seed + i)`.
    RandomToggle {
        seed: u64,
        publish: Publish,
        hold: Delay,
    },
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Pattern { .. } => "pattern",
            Self::RandomToggle { .. } => "random-toggle",
        }
    }
}

/// Everything that defines one harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub worker_count: usize,
    pub iterations_per_worker: u32,
    /// Busy delay inside each read-modify-write, between read and write.
    pub interleave_delay_micros: u64,
    pub access_strategy: AccessStrategy,
    pub substrate: Substrate,
    pub variant: Variant,
    /// Frame published (and written to the cell) after the join.
    pub finale: Option<Frame>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::counter()
    }
}

impl HarnessConfig {
    /// Two workers, 10 000 unsynchronized increments each.
    pub fn counter() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            iterations_per_worker: DEFAULT_ITERATIONS,
            interleave_delay_micros: DEFAULT_INTERLEAVE_DELAY_MICROS,
            access_strategy: AccessStrategy::Unsynchronized,
            substrate: Substrate::Native,
            variant: Variant::Counter,
            finale: None,
        }
    }

    /// The LED demo: one worker blinks red, the other alternates green and
    /// blue, each channel sampled separately.
    pub fn pattern() -> Self {
        let step = |value, settle, hold| PatternStep {
            value,
            settle: Delay::busy_micros(settle),
            hold: Delay::sleep_millis(hold),
        };
        let red = vec![
            step(0x01, SETTLE_A_MICROS, HOLD_A_MILLIS[0]),
            step(0x00, SETTLE_A_MICROS, HOLD_A_MILLIS[1]),
        ];
        let green_blue = vec![
            step(0x02, SETTLE_B_MICROS, HOLD_B_MILLIS[0]),
            step(0x04, SETTLE_B_MICROS, HOLD_B_MILLIS[1]),
        ];
        Self {
            worker_count: 2,
            iterations_per_worker: PATTERN_ITERATIONS,
            variant: Variant::Pattern {
                scripts: vec![red, green_blue],
                publish: Publish {
                    sampling: Sampling::Independent,
                    channel_delay: Delay::busy_micros(CHANNEL_DELAY_MICROS),
                },
            },
            finale: Some(PATTERN_FINALE),
            ..Self::counter()
        }
    }

    /// Workers toggling seeded random channels.
    pub fn random_toggle(seed: u64) -> Self {
        Self {
            iterations_per_worker: TOGGLE_ITERATIONS,
            variant: Variant::RandomToggle {
                seed,
                publish: Publish {
                    sampling: Sampling::Independent,
                    channel_delay: Delay::NONE,
                },
                hold: Delay::sleep_millis(TOGGLE_HOLD_MILLIS),
            },
            interleave_delay_micros: TOGGLE_RACE_WINDOW_MICROS,
            ..Self::counter()
        }
    }

    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations_per_worker = iterations;
        self
    }

    #[must_use]
    pub fn with_interleave_delay_micros(mut self, micros: u64) -> Self {
        self.interleave_delay_micros = micros;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: AccessStrategy) -> Self {
        self.access_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_substrate(mut self, substrate: Substrate) -> Self {
        self.substrate = substrate;
        self
    }

    /// Change how publish passes sample the cell. No effect on counters.
    #[must_use]
    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        match &mut self.variant {
            Variant::Counter => {}
            Variant::Pattern { publish, .. } | Variant::RandomToggle { publish, .. } => {
                publish.sampling = sampling;
            }
        }
        self
    }

    #[must_use]
    pub fn with_finale(mut self, finale: Option<Frame>) -> Self {
        self.finale = finale;
        self
    }

    /// Race window inserted into every read-modify-write.
    pub fn race_window(&self) -> Delay {
        Delay::busy_micros(self.interleave_delay_micros)
    }

    /// Check that the configuration describes a run the harness can perform.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.worker_count == 0 {
            return Err(HarnessError::invalid("worker_count must be at least 1"));
        }
        if self.worker_count > MAX_TASKS {
            return Err(HarnessError::invalid(format!(
                "worker_count {} exceeds the task limit of {MAX_TASKS}",
                self.worker_count
            )));
        }
        if let Substrate::Stepped { time_slice: 0, .. } = self.substrate {
            return Err(HarnessError::invalid("time_slice must be at least 1 tick"));
        }
        match &self.variant {
            Variant::Counter => {
                let total = u32::try_from(self.worker_count)
                    .ok()
                    .and_then(|w| w.checked_mul(self.iterations_per_worker));
                if total.is_none() {
                    return Err(HarnessError::invalid(
                        "worker_count × iterations_per_worker overflows the counter",
                    ));
                }
            }
            Variant::Pattern { scripts, .. } => {
                if scripts.is_empty() || scripts.iter().any(Vec::is_empty) {
                    return Err(HarnessError::invalid("pattern scripts must not be empty"));
                }
                let foreign = scripts
                    .iter()
                    .flatten()
                    .find(|step| Frame::from_bits(step.value).bits() != step.value);
                if let Some(step) = foreign {
                    return Err(HarnessError::invalid(format!(
                        "pattern {:#04x} drives bits beyond the {CHANNEL_COUNT} channels",
                        step.value
                    )));
                }
                if scripts.iter().flatten().any(|s| matches!(s.settle, Delay::Sleep(_))) {
                    return Err(HarnessError::invalid(
                        "settle delays must be busy waits; a sleep would hide the race",
                    ));
                }
            }
            Variant::RandomToggle { .. } => {}
        }
        Ok(())
    }

    /// One spec per worker, in creation order.
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        (0..self.worker_count)
            .map(|i| WorkerSpec {
                name: worker_name(i),
                priority: WORKER_PRIORITY,
                behavior: self.behavior(i),
            })
            .collect()
    }

    fn behavior(&self, index: usize) -> Behavior {
        let iterations = self.iterations_per_worker;
        match &self.variant {
            Variant::Counter => Behavior::Counter { iterations },
            Variant::Pattern { scripts, publish } => Behavior::Pattern {
                script: index
                    .checked_rem(scripts.len())
                    .and_then(|i| scripts.get(i))
                    .cloned()
                    .unwrap_or_default(),
                iterations,
                publish: *publish,
            },
            Variant::RandomToggle {
                seed,
                publish,
                hold,
            } => Behavior::RandomToggle {
                iterations,
                seed: seed.wrapping_add(index as u64),
                publish: *publish,
                hold: *hold,
            },
        }
    }

    /// Value the cell would hold if every worker ran in some serial order.
    pub fn expected(&self) -> Expected {
        match &self.variant {
            Variant::Counter => {
                let workers = u32::try_from(self.worker_count).unwrap_or(u32::MAX);
                let total = workers.wrapping_mul(self.iterations_per_worker);
                Expected::Count(INITIAL_VALUE.wrapping_add(total))
            }
            Variant::Pattern { scripts, .. } => {
                let used = scripts.len().min(self.worker_count);
                let written: BTreeSet<u32> = std::iter::once(INITIAL_VALUE)
                    .chain(scripts[..used].iter().flatten().map(|step| step.value))
                    .collect();
                Expected::AnyOf(written.into_iter().collect())
            }
            Variant::RandomToggle { seed, .. } => {
                let mask = (0..self.worker_count).fold(INITIAL_VALUE, |acc, i| {
                    acc ^ ToggleSequence::combined_mask(
                        seed.wrapping_add(i as u64),
                        self.iterations_per_worker,
                    )
                });
                Expected::Exact(mask)
            }
        }
    }
}

/// `worker-a`, `worker-b`, … then `worker-26`, `worker-27`, …
pub fn worker_name(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => format!("worker-{}", char::from(b'a' + i)),
        _ => format!("worker-{index}"),
    }
}
