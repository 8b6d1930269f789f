//! # RaceLab: Observable Read-Modify-Write Races
//!
//! A small harness that makes a classic data race visible: two or more
//! equal-priority workers mutate one shared cell without coordination, a join
//! barrier waits for all of them, and an outcome reporter compares the result
//! with what a serial execution would have produced.
//!
//! ## Overview
//!
//! The harness exists to show the bug, not to fix it. With the unsynchronized
//! strategy the result of a run is nondeterministic within bounds:
//!
//! - **Counters never exceed `W × K`**, they can only lose increments
//! - **Pattern frames can be torn**, mixing bits written by different workers
//! - **A matching result proves nothing**, the race just did not fire this time
//!
//! Switching the cell to the synchronized or atomic strategy removes the race
//! without touching worker code.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Harness (harness.rs)                    │
//! │   validate · ready sink · spawn · start · join · report │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Workers     │   Shared Cell      │  Outcome          │
//! │  task.rs     │   cell.rs          │  outcome.rs       │
//! │  ─ counter   │   ─ read/write     │  ─ classify()     │
//! │  ─ pattern   │   ─ modify()       │  ─ assess()       │
//! │  ─ toggle    │   ─ strategies     │  ─ report()       │
//! ├──────────────┴─────────┬──────────┴───────────────────┤
//! │   Kernel (kernel.rs)   │   Output Sink (sink.rs)       │
//! │   create · start · join│   ready · set_channel · frame │
//! ├────────────────────────┴──────────────────────────────┤
//! │          Execution Port (arch/mod.rs)                   │
//! │   native threads  ·  stepped scheduler (scheduler.rs)   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Substrates
//!
//! | Substrate | Preemption | Reproducible |
//! |-----------|------------|--------------|
//! | `Native` | host OS, any instruction | no |
//! | `Stepped` | after any primitive cell operation, seeded slices | per seed |
//!
//! ## Variants
//!
//! | Variant | Expected | Race shows up as |
//! |---------|----------|------------------|
//! | counter | `W × K` | lost increments |
//! | pattern | any written pattern | torn frames |
//! | random toggle | XOR of all toggled masks | lost toggles |

pub mod arch;
pub mod cell;
pub mod config;
pub mod error;
pub mod harness;
pub mod kernel;
pub mod outcome;
pub mod rng;
pub mod scheduler;
pub mod sink;
pub mod sync;
pub mod task;

pub use arch::{Delay, Substrate};
pub use cell::{AccessStrategy, SharedCell};
pub use config::{HarnessConfig, Variant};
pub use error::HarnessError;
pub use harness::{Harness, RunReport};
pub use outcome::{Expected, Outcome, OutcomeReporter, Verdict};
pub use sink::{Channel, Frame, OutputSink, RecordingSink, TraceSink};
pub use task::{Sampling, WorkerReport, WorkerSpec};
