//! # Shared Cell
//!
//! The single piece of shared mutable state every worker hammers on. The
//! value is an integer counter or a small bitfield (one bit per output
//! channel); both live in the same `u32`.
//!
//! ## Access Strategies
//!
//! | Strategy | `modify(f)` | Linearizable |
//! |----------|-------------|--------------|
//! | `Unsynchronized` | `write(f(read()))`, race window in between | no |
//! | `Synchronized` | same sequence inside a critical section | yes |
//! | `Atomic` | one atomic fetch-update | yes |
//!
//! Plain loads and stores are relaxed atomics, so an unsynchronized
//! read-modify-write loses updates exactly like a `volatile` variable would,
//! without being undefined behavior. Every primitive read and write ends with
//! a preemption point.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{self, Delay};
use crate::sync;

/// How `modify` (and therefore `increment`/`toggle`) reaches the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStrategy {
    /// Read, compute, write, with nothing stopping another task in between.
    #[default]
    Unsynchronized,
    /// The read-compute-write sequence runs inside a critical section.
    Synchronized,
    /// A single atomic fetch-update.
    Atomic,
}

impl AccessStrategy {
    /// True if concurrent `modify` calls never lose an update.
    pub const fn is_linearizable(self) -> bool {
        !matches!(self, Self::Unsynchronized)
    }
}

impl fmt::Display for AccessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsynchronized => "unsynchronized",
            Self::Synchronized => "synchronized",
            Self::Atomic => "atomic",
        })
    }
}

/// Shared value plus the strategy used to update it.
#[derive(Debug)]
pub struct SharedCell {
    value: AtomicU32,
    strategy: AccessStrategy,
    race_window: Delay,
}

impl SharedCell {
    pub const fn new(initial: u32, strategy: AccessStrategy) -> Self {
        Self {
            value: AtomicU32::new(initial),
            strategy,
            race_window: Delay::NONE,
        }
    }

    /// Delay inserted between the read and the write of a read-modify-write.
    /// Ignored by the `Atomic` strategy, which has no such gap.
    #[must_use]
    pub fn with_race_window(mut self, window: Delay) -> Self {
        self.race_window = window;
        self
    }

    pub const fn strategy(&self) -> AccessStrategy {
        self.strategy
    }

    /// One primitive load.
    #[inline]
    pub fn read(&self) -> u32 {
        let value = self.value.load(Ordering::Relaxed);
        arch::preempt_point();
        value
    }

    /// One primitive store.
    #[inline]
    pub fn write(&self, value: u32) {
        self.value.store(value, Ordering::Relaxed);
        arch::preempt_point();
    }

    /// Replace the value with `f(value)` using the configured strategy and
    /// return the value written. `f` may run more than once under `Atomic`.
    pub fn modify<F>(&self, f: F) -> u32
    where
        F: Fn(u32) -> u32,
    {
        match self.strategy {
            AccessStrategy::Unsynchronized => self.read_modify_write(f),
            AccessStrategy::Synchronized => {
                sync::critical_section(|_cs| self.read_modify_write(f))
            }
            AccessStrategy::Atomic => {
                let prev = self
                    .value
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(f(v)))
                    .unwrap_or_else(|v| v);
                arch::preempt_point();
                f(prev)
            }
        }
    }

    /// `modify(v + 1)`, wrapping on overflow.
    #[inline]
    pub fn increment(&self) -> u32 {
        self.modify(|v| v.wrapping_add(1))
    }

    /// `modify(v ^ mask)`.
    #[inline]
    pub fn toggle(&self, mask: u32) -> u32 {
        self.modify(|v| v ^ mask)
    }

    fn read_modify_write<F>(&self, f: F) -> u32
    where
        F: Fn(u32) -> u32,
    {
        let value = self.read();
        arch::delay(self.race_window);
        let next = f(value);
        self.write(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread_semantics_match_across_strategies() {
        for strategy in [
            AccessStrategy::Unsynchronized,
            AccessStrategy::Synchronized,
            AccessStrategy::Atomic,
        ] {
            let cell = SharedCell::new(0, strategy);
            for _ in 0..10 {
                cell.increment();
            }
            assert_eq!(cell.read(), 10, "{strategy}");
            assert_eq!(cell.toggle(0x04), 14);
            assert_eq!(cell.toggle(0x04), 10);
            cell.write(0x02);
            assert_eq!(cell.read(), 0x02);
        }
    }

    #[test]
    fn test_increment_wraps() {
        let cell = SharedCell::new(u32::MAX, AccessStrategy::Unsynchronized);
        assert_eq!(cell.increment(), 0);
    }

    #[test]
    fn test_linearizable_strategies_never_lose_updates() {
        for strategy in [AccessStrategy::Synchronized, AccessStrategy::Atomic] {
            let cell = Arc::new(SharedCell::new(0, strategy));
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let cell = Arc::clone(&cell);
                    thread::spawn(move || {
                        for _ in 0..5_000 {
                            cell.increment();
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }
            assert_eq!(cell.read(), 20_000, "{strategy}");
        }
    }

    #[test]
    fn test_strategy_flags() {
        assert!(!AccessStrategy::Unsynchronized.is_linearizable());
        assert!(AccessStrategy::Synchronized.is_linearizable());
        assert!(AccessStrategy::Atomic.is_linearizable());
        assert_eq!(AccessStrategy::default(), AccessStrategy::Unsynchronized);
    }
}
