use std::time::Duration;

use crate::config::Settings;

/// Desired playback state, ordered by rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    /// No player running
    Off,
    /// Plain looping playback
    Normal,
    /// Looping playback with the hue-rotation filter
    Rainbow,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Off => write!(f, "off"),
            Mode::Normal => write!(f, "normal"),
            Mode::Rainbow => write!(f, "rainbow"),
        }
    }
}

/// Map an idle duration onto a mode.
///
/// Thresholds are inclusive lower bounds, so an idle time exactly at a
/// threshold selects the higher mode. There is no hysteresis.
pub fn resolve(idle: Duration, settings: &Settings) -> Mode {
    if idle >= settings.second_threshold {
        Mode::Rainbow
    } else if idle >= settings.first_threshold {
        Mode::Normal
    } else {
        Mode::Off
    }
}
