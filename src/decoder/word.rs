//! Button words: one bit per button, bit set means pressed

use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest word any protocol produces
pub const MAX_WIDTH: u8 = 16;

/// Word width of the extended shift-register protocol
pub const SHIFT_REGISTER_WIDTH: u8 = 11;

/// Word width of the serial protocol
pub const SERIAL_WIDTH: u8 = 16;

/// Fixed-width button state.
///
/// The width itself belongs to the protocol, not to the word: readers never
/// set bits at or above their configured width, so the spare high bits of
/// the backing `u16` stay clear.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonWord(u16);

impl ButtonWord {
    /// Nothing pressed
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn is_pressed(&self, bit: u8) -> bool {
        bit < MAX_WIDTH && (self.0 >> bit) & 1 == 1
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn set(&mut self, bit: u8, pressed: bool) {
        if bit >= MAX_WIDTH {
            return;
        }
        if pressed {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }

    pub fn with_pressed(mut self, bit: u8) -> Self {
        self.set(bit, true);
        self
    }

    /// Mask of the bits that differ from `other`
    pub const fn changed(&self, other: ButtonWord) -> u16 {
        self.0 ^ other.0
    }

    /// Clears every bit at or above `width`
    pub const fn truncated(&self, width: u8) -> Self {
        if width >= MAX_WIDTH {
            *self
        } else {
            Self(self.0 & ((1u16 << width) - 1))
        }
    }

    pub const fn pressed_count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Renders the low `width` bits MSB-first, e.g. `00000100010`
    pub fn render(&self, width: u8) -> String {
        let width = width.min(MAX_WIDTH);
        (0..width)
            .rev()
            .map(|bit| if self.is_pressed(bit) { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Binary for ButtonWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&self.0, f)
    }
}

/// Order in which sampled bits land in the word
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    /// The first sampled bit is bit 0
    #[default]
    LsbFirst,
    /// The first sampled bit is bit `width - 1`
    MsbFirst,
}

impl BitOrder {
    /// Word bit that receives the `index`-th sample of a `width`-bit frame
    pub const fn bit_for_sample(self, index: u8, width: u8) -> u8 {
        match self {
            BitOrder::LsbFirst => index,
            BitOrder::MsbFirst => width - 1 - index,
        }
    }
}
