//! # Outcome Reporter
//!
//! Compares what the cell holds after the join with what a serial execution
//! would have produced, and says whether the race showed up this time. A
//! matching value proves nothing: the race is still there, it just did not
//! manifest in this interleaving.

use core::fmt;

use tracing::{info, warn};

use crate::sink::Frame;

/// Value (or set of values) a serial execution could leave in the cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// A count of increments; falling short of it means updates were lost.
    Count(u32),
    /// One exact bit pattern, e.g. the XOR of every toggled mask.
    Exact(u32),
    /// Any of the listed values, e.g. every pattern written as a whole.
    AnyOf(Vec<u32>),
}

impl Expected {
    pub fn admits(&self, value: u32) -> bool {
        match self {
            Self::Count(v) | Self::Exact(v) => *v == value,
            Self::AnyOf(set) => set.contains(&value),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(v) => write!(f, "{v}"),
            Self::Exact(v) => write!(f, "{v:#04x}"),
            Self::AnyOf(set) => {
                f.write_str("{")?;
                for (i, v) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v:#04x}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The result matched a serial execution. The race can still happen.
    RaceNotObservedThisRun,
    RaceDetected,
}

impl Verdict {
    pub const fn is_detected(self) -> bool {
        matches!(self, Self::RaceDetected)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RaceNotObservedThisRun => "race not observed this run",
            Self::RaceDetected => "race detected",
        })
    }
}

/// Classified result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub expected: Expected,
    pub actual: u32,
    pub verdict: Verdict,
    /// Published frames outside the expected set, in the order given.
    pub torn_frames: Vec<Frame>,
}

impl Outcome {
    /// Increments that vanished. `None` unless the run counted.
    pub fn lost_updates(&self) -> Option<u32> {
        match self.expected {
            Expected::Count(v) => Some(v.saturating_sub(self.actual)),
            Expected::Exact(_) | Expected::AnyOf(_) => None,
        }
    }

    /// Bits that differ from the exact expected pattern. `None` for counts
    /// and sets.
    pub fn flipped_bits(&self) -> Option<u32> {
        match self.expected {
            Expected::Exact(v) => Some((v ^ self.actual).count_ones()),
            Expected::Count(_) | Expected::AnyOf(_) => None,
        }
    }
}

pub struct OutcomeReporter;

impl OutcomeReporter {
    pub fn classify(actual: u32, expected: &Expected) -> Verdict {
        if expected.admits(actual) {
            Verdict::RaceNotObservedThisRun
        } else {
            Verdict::RaceDetected
        }
    }

    /// Classify the final value and every published frame. A single torn
    /// frame is enough to detect the race.
    pub fn assess(expected: Expected, actual: u32, frames: &[Frame]) -> Outcome {
        let torn_frames: Vec<Frame> = frames
            .iter()
            .copied()
            .filter(|frame| !expected.admits(frame.bits()))
            .collect();
        let verdict = match Self::classify(actual, &expected) {
            Verdict::RaceNotObservedThisRun if !torn_frames.is_empty() => Verdict::RaceDetected,
            verdict => verdict,
        };
        Outcome {
            expected,
            actual,
            verdict,
            torn_frames,
        }
    }

    /// Log the classification. Nothing is corrected.
    pub fn report(outcome: &Outcome) {
        match outcome.verdict {
            Verdict::RaceNotObservedThisRun => warn!(
                expected = %outcome.expected,
                actual = outcome.actual,
                "race not observed this run; the bug is still present"
            ),
            Verdict::RaceDetected => info!(
                expected = %outcome.expected,
                actual = outcome.actual,
                lost = ?outcome.lost_updates(),
                flipped = ?outcome.flipped_bits(),
                torn = outcome.torn_frames.len(),
                first_torn = ?outcome.torn_frames.first().map(ToString::to_string),
                "race detected"
            ),
        }
    }
}
