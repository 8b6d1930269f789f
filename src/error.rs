//! # Errors
//!
//! Every failure the harness can report happens during startup. Once the
//! workers are running there is no error path; a detected race is a
//! classification (see [`crate::outcome::Verdict`]), not an error.

use crate::sink::{Channel, SinkError};

/// Startup failure of a harness run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// An output channel failed its readiness check. Nothing was spawned.
    #[error("output channel {channel} is not ready")]
    ResourceNotReady {
        /// Channel that failed.
        channel: Channel,
        /// Sink-level cause.
        #[source]
        source: SinkError,
    },
    /// The configuration cannot describe a valid run.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },
    /// The kernel task table is full.
    #[error("task limit reached: at most {max} tasks")]
    TaskLimit {
        /// Size of the task table.
        max: usize,
    },
    /// The host refused to create a thread for a worker.
    #[error("failed to spawn worker {name}")]
    Spawn {
        /// Worker name.
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
