//! # Harness
//!
//! One complete run: validate, ready the sink, spawn the workers, release
//! them together, join, classify, and optionally publish a finale frame.

use std::sync::Arc;

use tracing::{error, info};

use crate::cell::SharedCell;
use crate::config::{HarnessConfig, Variant, INITIAL_VALUE};
use crate::error::HarnessError;
use crate::kernel::{self, Kernel, TaskHandle};
use crate::outcome::{Outcome, OutcomeReporter};
use crate::sink::{Channel, Frame, OutputSink};
use crate::task::WorkerReport;

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: Outcome,
    /// One report per worker, in creation order.
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    /// Every frame every worker published, worker by worker.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.workers.iter().flat_map(|w| w.frames.iter().copied())
    }
}

pub struct Harness {
    config: HarnessConfig,
    sink: Arc<dyn OutputSink>,
}

impl Harness {
    pub fn new(config: HarnessConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Perform one run.
    ///
    /// Fails only during startup. A run that detects the race is a success.
    pub fn run(&self) -> Result<RunReport, HarnessError> {
        let config = &self.config;
        config.validate()?;
        info!(
            variant = config.variant.name(),
            workers = config.worker_count,
            iterations = config.iterations_per_worker,
            strategy = %config.access_strategy,
            substrate = %config.substrate,
            delay_us = config.interleave_delay_micros,
            expected = %config.expected(),
            "race harness starting"
        );

        self.ready_outputs()?;

        let cell = Arc::new(
            SharedCell::new(INITIAL_VALUE, config.access_strategy)
                .with_race_window(config.race_window()),
        );

        let handles = self.spawn_workers(&cell)?;
        let workers = kernel::join_all(handles);

        let actual = cell.read();
        let frames: Vec<Frame> = match config.variant {
            Variant::Pattern { .. } => workers
                .iter()
                .flat_map(|w| w.frames.iter().copied())
                .collect(),
            _ => Vec::new(),
        };
        let outcome = OutcomeReporter::assess(config.expected(), actual, &frames);
        OutcomeReporter::report(&outcome);

        if let Some(finale) = config.finale {
            self.show_finale(&cell, finale);
        }

        Ok(RunReport { outcome, workers })
    }

    /// Check every channel before anything is spawned.
    fn ready_outputs(&self) -> Result<(), HarnessError> {
        for channel in Channel::ALL {
            if let Err(source) = self.sink.ready(channel) {
                error!(%channel, error = %source, "output channel not ready");
                return Err(HarnessError::ResourceNotReady { channel, source });
            }
        }
        Ok(())
    }

    /// Create every worker, then start them all. On failure the kernel is
    /// dropped unstarted, which releases the tasks created so far unrun.
    fn spawn_workers(&self, cell: &Arc<SharedCell>) -> Result<Vec<TaskHandle>, HarnessError> {
        let mut kernel = Kernel::new(self.config.substrate);
        let handles = self
            .config
            .worker_specs()
            .into_iter()
            .map(|spec| kernel.create_task(spec, Arc::clone(cell), Arc::clone(&self.sink)))
            .collect::<Result<Vec<_>, _>>()?;
        kernel.start();
        Ok(handles)
    }

    fn show_finale(&self, cell: &SharedCell, finale: Frame) {
        cell.write(finale.bits());
        for channel in Channel::ALL {
            self.sink.set_channel(channel, finale.is_on(channel));
        }
        info!(%finale, "finale shown");
    }
}
