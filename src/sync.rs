//! # Synchronization Primitives
//!
//! Critical sections for the synchronized access strategy. Mutual exclusion
//! comes from the `critical-section` crate (its `std` implementation, a
//! process-wide reentrant lock). On top of that this module tracks nesting per
//! thread so the stepped substrate can mask preemption the way disabling
//! interrupts masks SysTick on a microcontroller: a slice that expires inside
//! the section pends the switch until the outermost section exits.

use core::cell::Cell;

use critical_section::CriticalSection;

use crate::arch;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Nesting marker; unwinds correctly if the guarded closure panics.
struct Nesting;

impl Nesting {
    fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Nesting
    }
}

impl Drop for Nesting {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Execute a closure within a critical section.
///
/// No other critical section, on any thread, runs concurrently with `f`, and
/// under the stepped substrate the calling task cannot be preempted inside it.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // read-modify-write shared state
/// });
/// ```
///
/// Keep critical sections short: every other worker that needs one waits.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    let result = {
        let _nesting = Nesting::enter();
        ::critical_section::with(f)
    };
    if !in_critical_section() {
        arch::on_critical_exit();
    }
    result
}

/// True while the current thread is inside [`critical_section`].
#[inline]
pub fn in_critical_section() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_is_tracked() {
        assert!(!in_critical_section());
        let depth = critical_section(|_| {
            assert!(in_critical_section());
            critical_section(|_| DEPTH.with(Cell::get))
        });
        assert_eq!(depth, 2);
        assert!(!in_critical_section());
    }
}
