//! # Bumper debouncing

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Debounces one bumper contact.
///
/// The output is only set once the raw contact has been closed for the trigger delay, and is
/// cleared as soon as the contact opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct BumperDebouncer {
    /// Time of the rising edge of the raw contact, `None` while open
    pressed_since_s: Option<f64>,

    triggered: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BumperSide {
    Left,
    Right,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BumperDebouncer {
    /// Feed the raw contact state, returning the debounced state.
    pub fn update(&mut self, pressed: bool, now_s: f64, trigger_delay_s: f64) -> bool {
        if pressed {
            let since_s = *self.pressed_since_s.get_or_insert(now_s);
            self.triggered = now_s - since_s >= trigger_delay_s;
        } else {
            self.pressed_since_s = None;
            self.triggered = false;
        }

        self.triggered
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// How long the raw contact has been closed.
    pub fn held_s(&self, now_s: f64) -> f64 {
        self.pressed_since_s.map_or(0.0, |t| now_s - t)
    }
}

impl BumperSide {
    /// Angle of the contact point relative to the heading, positive to the left.
    pub fn angle_offset_rad(&self, bumper_angle_rad: f64) -> f64 {
        match self {
            BumperSide::Left => bumper_angle_rad,
            BumperSide::Right => -bumper_angle_rad,
        }
    }
}

impl std::fmt::Display for BumperSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BumperSide::Left => write!(f, "left"),
            BumperSide::Right => write!(f, "right"),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debounce() {
        let mut b = BumperDebouncer::default();

        assert!(!b.update(true, 0.0, 0.1));
        assert!(!b.update(true, 0.05, 0.1));
        assert!(b.update(true, 0.1, 0.1));
        assert!((b.held_s(0.3) - 0.3).abs() < 1e-9);

        // A short bounce restarts the delay
        assert!(!b.update(false, 0.12, 0.1));
        assert!(!b.update(true, 0.14, 0.1));
        assert!(b.update(true, 0.25, 0.1));
    }
}
