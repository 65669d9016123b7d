//! Single-bit sampling with a fail-closed fallback

use crate::gpio::{GpioBus, Level, Line};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which wire level means "pressed"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Idle-high line, `Low` = pressed (shift-register pads)
    ActiveLow,
    /// `High` = pressed, the word bit equals the sampled level (serial pads)
    ActiveHigh,
}

impl Polarity {
    pub const fn is_pressed(self, level: Level) -> bool {
        matches!(
            (self, level),
            (Polarity::ActiveLow, Level::Low) | (Polarity::ActiveHigh, Level::High)
        )
    }

    /// Wire level a pad drives for a button in the given state
    pub const fn level_for(self, pressed: bool) -> Level {
        match (self, pressed) {
            (Polarity::ActiveLow, true) | (Polarity::ActiveHigh, false) => Level::Low,
            (Polarity::ActiveLow, false) | (Polarity::ActiveHigh, true) => Level::High,
        }
    }
}

/// Outcome of reading one bit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sample {
    Pressed,
    Released,
    /// The line could not be read; counts as released
    Fault,
}

impl Sample {
    /// A fault never reads as a press
    pub const fn is_pressed(self) -> bool {
        matches!(self, Sample::Pressed)
    }

    pub const fn is_fault(self) -> bool {
        matches!(self, Sample::Fault)
    }
}

/// Reads the logical state of one data line.
///
/// A read error is reported as [`Sample::Fault`] and never escalated: a
/// broken or disconnected controller must degrade to "nothing pressed", not
/// to phantom presses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitSampler {
    line: Line,
    polarity: Polarity,
}

impl BitSampler {
    pub const fn new(line: Line, polarity: Polarity) -> Self {
        Self { line, polarity }
    }

    pub const fn line(&self) -> Line {
        self.line
    }

    pub const fn polarity(&self) -> Polarity {
        self.polarity
    }

    #[inline]
    pub fn sample<B: GpioBus + ?Sized>(&self, bus: &mut B) -> Sample {
        match bus.read(self.line) {
            Ok(level) if self.polarity.is_pressed(level) => Sample::Pressed,
            Ok(_) => Sample::Released,
            Err(e) => {
                // Counted per frame and reported in the periodic stats
                debug!("Sampling {} failed, treating bit as released: {}", self.line, e);
                Sample::Fault
            }
        }
    }
}
