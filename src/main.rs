//! # RaceLab Demo
//!
//! Runs the race harness from the command line and prints how often the race
//! showed up.
//!
//! | Variant | Workers | Default workload |
//! |---------|---------|------------------|
//! | `counter` | 2 | 10 000 bare increments each |
//! | `pattern` | 2 | red blink vs. green/blue alternation, 40 passes |
//! | `random-toggle` | 2 | 64 seeded channel toggles each |
//!
//! ```text
//! racelab --variant counter --runs 20
//! racelab --variant counter --strategy synchronized --runs 20
//! racelab --variant pattern --substrate stepped --seed 7
//! RUST_LOG=racelab=debug racelab --variant random-toggle
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use racelab::config::DEFAULT_SEED;
use racelab::{
    AccessStrategy, Harness, HarnessConfig, OutputSink, Sampling, Substrate, TraceSink,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(ValueEnum, Debug, Clone, Copy)]
enum VariantArg {
    Counter,
    Pattern,
    RandomToggle,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum StrategyArg {
    Unsynchronized,
    Synchronized,
    Atomic,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SubstrateArg {
    Native,
    Stepped,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SamplingArg {
    Independent,
    Atomic,
}

#[derive(Parser, Debug)]
#[command(name = "racelab", version, about = "Make a read-modify-write race observable")]
struct Cli {
    /// Workload the workers run
    #[arg(long = "variant", value_enum, default_value_t = VariantArg::Counter)]
    variant: VariantArg,

    /// How the shared cell is updated
    #[arg(long = "strategy", value_enum, default_value_t = StrategyArg::Unsynchronized)]
    strategy: StrategyArg,

    /// Runtime that executes the workers
    #[arg(long = "substrate", value_enum, default_value_t = SubstrateArg::Native)]
    substrate: SubstrateArg,

    /// Number of workers (variant default if omitted)
    #[arg(long = "workers")]
    workers: Option<usize>,

    /// Iterations per worker (variant default if omitted)
    #[arg(long = "iterations")]
    iterations: Option<u32>,

    /// Busy delay between read and write of each update, in microseconds
    /// (variant default if omitted)
    #[arg(long = "delay-micros")]
    delay_micros: Option<u64>,

    /// How publish passes sample the cell
    #[arg(long = "sampling", value_enum)]
    sampling: Option<SamplingArg>,

    /// Seed for the stepped scheduler and the toggle sequences
    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Repeat the run this many times
    #[arg(long = "runs", default_value_t = 1)]
    runs: u32,
}

impl Cli {
    /// Configuration of run number `run`. Stepped runs get consecutive seeds
    /// so repeated runs explore different interleavings.
    fn config(&self, run: u32) -> HarnessConfig {
        let mut config = match self.variant {
            VariantArg::Counter => HarnessConfig::counter(),
            VariantArg::Pattern => HarnessConfig::pattern(),
            VariantArg::RandomToggle => HarnessConfig::random_toggle(self.seed),
        };
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(iterations) = self.iterations {
            config = config.with_iterations(iterations);
        }
        if let Some(micros) = self.delay_micros {
            config = config.with_interleave_delay_micros(micros);
        }
        if let Some(sampling) = self.sampling {
            config = config.with_sampling(match sampling {
                SamplingArg::Independent => Sampling::Independent,
                SamplingArg::Atomic => Sampling::Atomic,
            });
        }
        let strategy = match self.strategy {
            StrategyArg::Unsynchronized => AccessStrategy::Unsynchronized,
            StrategyArg::Synchronized => AccessStrategy::Synchronized,
            StrategyArg::Atomic => AccessStrategy::Atomic,
        };
        let substrate = match self.substrate {
            SubstrateArg::Native => Substrate::Native,
            SubstrateArg::Stepped => {
                Substrate::stepped(self.seed.wrapping_add(u64::from(run)))
            }
        };
        config.with_strategy(strategy).with_substrate(substrate)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("racelab=info")),
        )
        .init();

    let cli = Cli::parse();
    let sink: Arc<dyn OutputSink> = Arc::new(TraceSink::new());

    let runs = cli.runs.max(1);
    let mut detected = 0u32;
    let mut lost: Vec<u32> = Vec::new();
    for run in 0..runs {
        let harness = Harness::new(cli.config(run), Arc::clone(&sink));
        match harness.run() {
            Ok(report) => {
                lost.extend(report.outcome.lost_updates());
                if report.outcome.verdict.is_detected() {
                    detected += 1;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "harness failed to start");
                eprintln!("racelab: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    match (lost.iter().min(), lost.iter().max()) {
        (Some(min), Some(max)) => println!(
            "race detected in {detected}/{runs} runs (lost updates per run: min {min}, max {max})"
        ),
        _ => println!("race detected in {detected}/{runs} runs"),
    }
    ExitCode::SUCCESS
}
