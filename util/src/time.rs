//! General time utility functions and the clock abstraction used by the control loop.
//!
//! All deadlines in the navigation core are stored as absolute clock seconds and compared once per
//! cycle, so the only thing a module needs is a [`Clock`] to read the current time from.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{cell::Cell, rc::Rc};

use crate::session;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A monotonic source of time in seconds.
pub trait Clock {
    /// Current time in seconds.
    fn now_s(&self) -> f64;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Clock reading the elapsed time of the current session.
///
/// The session must have been created before this clock is read.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionClock;

/// Manually driven clock.
///
/// Clones share the same time, so a test can keep one handle and give another to the code under
/// test.
#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    time_s: Rc<Cell<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Clock for SessionClock {
    fn now_s(&self) -> f64 {
        session::get_elapsed_seconds()
    }
}

impl FakeClock {
    pub fn new(start_s: f64) -> Self {
        Self {
            time_s: Rc::new(Cell::new(start_s)),
        }
    }

    /// Move the clock forward by `dt_s` seconds.
    pub fn advance(&self, dt_s: f64) {
        self.time_s.set(self.time_s.get() + dt_s);
    }

    pub fn set(&self, time_s: f64) {
        self.time_s.set(time_s);
    }
}

impl Clock for FakeClock {
    fn now_s(&self) -> f64 {
        self.time_s.get()
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fake_clock_shared() {
        let clock = FakeClock::new(1.0);
        let handle = clock.clone();

        handle.advance(0.5);
        assert_eq!(clock.now_s(), 1.5);

        clock.set(10.0);
        assert_eq!(handle.now_s(), 10.0);
    }

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
    }
}
