//! Sliding window retry limiter

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Counts attempts inside a sliding time window.
#[derive(Debug, Clone, Default)]
pub struct RetryWindow {
    window_s: f64,
    max_attempts: usize,
    attempts_s: VecDeque<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RetryWindow {
    pub fn new(window_s: f64, max_attempts: usize) -> Self {
        Self {
            window_s,
            max_attempts,
            attempts_s: VecDeque::new(),
        }
    }

    /// Record an attempt. Returns `false` if the attempt exceeds the allowed number within the
    /// window.
    pub fn record(&mut self, now_s: f64) -> bool {
        while let Some(&t) = self.attempts_s.front() {
            if now_s - t > self.window_s {
                self.attempts_s.pop_front();
            } else {
                break;
            }
        }

        self.attempts_s.push_back(now_s);
        self.attempts_s.len() <= self.max_attempts
    }

    /// Number of attempts recorded within the window ending at the last attempt.
    pub fn count(&self) -> usize {
        self.attempts_s.len()
    }

    pub fn clear(&mut self) {
        self.attempts_s.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_window_limit() {
        let mut w = RetryWindow::new(10.0, 3);

        assert!(w.record(0.0));
        assert!(w.record(1.0));
        assert!(w.record(2.0));
        assert!(!w.record(3.0));
        assert_eq!(w.count(), 4);

        // The first attempts slide out of the window
        assert!(w.record(12.5));
        assert_eq!(w.count(), 2);

        w.clear();
        assert_eq!(w.count(), 0);
    }
}
