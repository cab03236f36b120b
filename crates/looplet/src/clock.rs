//! Virtual clock owned by the event loop
//!
//! Time is a monotone `Duration` offset starting at zero. The loop advances
//! it to the nearest timer deadline whenever no task is ready, so sleep-heavy
//! workloads complete without any wall-clock waiting and scheduling order is
//! fully deterministic.

use std::cell::Cell;
use std::time::Duration;

/// Monotone virtual clock
pub(crate) struct VirtualClock {
    now: Cell<Duration>,
}

impl VirtualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
        }
    }

    /// Current virtual time
    pub(crate) fn now(&self) -> Duration {
        self.now.get()
    }

    /// Advance to `deadline`; never moves backwards
    pub(crate) fn advance_to(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}
