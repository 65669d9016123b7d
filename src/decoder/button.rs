//! Logical buttons and the bit-to-button map

use super::word::MAX_WIDTH;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// Logical button identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonId {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
    C,
    D,
    Push,
    X,
    Y,
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of a [`ButtonMap`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonMapping {
    pub bit: u8,
    pub button: ButtonId,
}

impl ButtonMapping {
    pub const fn new(bit: u8, button: ButtonId) -> Self {
        Self { bit, button }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ButtonMapError {
    #[error("Button map is empty")]
    Empty,

    #[error("Bit {bit} ({button}) is outside a {width}-bit word")]
    BitOutOfRange { bit: u8, button: ButtonId, width: u8 },

    #[error("Bit {0} is mapped more than once")]
    DuplicateBit(u8),
}

/// Ordered bit-to-button assignment.
///
/// The order of the entries is the order in which transitions of a single
/// frame are reported, so it is part of the contract with the input sink.
/// Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ButtonMapping>", into = "Vec<ButtonMapping>")]
pub struct ButtonMap {
    entries: Vec<ButtonMapping>,
}

impl ButtonMap {
    pub fn new(entries: Vec<ButtonMapping>) -> Result<Self, ButtonMapError> {
        if entries.is_empty() {
            return Err(ButtonMapError::Empty);
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.bit >= MAX_WIDTH {
                return Err(ButtonMapError::BitOutOfRange {
                    bit: entry.bit,
                    button: entry.button,
                    width: MAX_WIDTH,
                });
            }
            if !seen.insert(entry.bit) {
                return Err(ButtonMapError::DuplicateBit(entry.bit));
            }
        }

        Ok(Self { entries })
    }

    /// Bit 0 to bit 10: A, B, Select, Start, Up, Down, Left, Right, C, D, Push
    pub fn nes_extended() -> Self {
        use ButtonId::*;
        Self::from_static(&[A, B, Select, Start, Up, Down, Left, Right, C, D, Push])
    }

    /// Ten-bit layout of the first virtual pad.
    ///
    /// Wire order is B, A, Y, X, Select, Start, Down, Right, Up, Left, but
    /// transitions are reported face buttons first and then the D-pad.
    pub fn legacy_ten_bit() -> Self {
        use ButtonId::*;
        Self {
            entries: vec![
                ButtonMapping::new(1, A),
                ButtonMapping::new(0, B),
                ButtonMapping::new(3, X),
                ButtonMapping::new(2, Y),
                ButtonMapping::new(4, Select),
                ButtonMapping::new(5, Start),
                ButtonMapping::new(8, Up),
                ButtonMapping::new(6, Down),
                ButtonMapping::new(9, Left),
                ButtonMapping::new(7, Right),
            ],
        }
    }

    /// Default for the serial protocol: the extended layout on the low
    /// eleven bits, bits 11 to 15 left unmapped
    pub fn serial_sixteen() -> Self {
        Self::nes_extended()
    }

    fn from_static(buttons: &[ButtonId]) -> Self {
        Self {
            entries: buttons
                .iter()
                .enumerate()
                .map(|(bit, &button)| ButtonMapping::new(bit as u8, button))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[ButtonMapping] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ButtonMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn buttons(&self) -> Vec<ButtonId> {
        self.entries.iter().map(|e| e.button).collect()
    }

    pub fn button_at(&self, bit: u8) -> Option<ButtonId> {
        self.entries.iter().find(|e| e.bit == bit).map(|e| e.button)
    }

    pub fn bit_of(&self, button: ButtonId) -> Option<u8> {
        self.entries.iter().find(|e| e.button == button).map(|e| e.bit)
    }

    /// Checks every mapped bit exists in a `width`-bit word
    pub fn check_width(&self, width: u8) -> Result<(), ButtonMapError> {
        match self.entries.iter().find(|e| e.bit >= width) {
            Some(entry) => Err(ButtonMapError::BitOutOfRange {
                bit: entry.bit,
                button: entry.button,
                width,
            }),
            None => Ok(()),
        }
    }
}

impl TryFrom<Vec<ButtonMapping>> for ButtonMap {
    type Error = ButtonMapError;

    fn try_from(entries: Vec<ButtonMapping>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<ButtonMap> for Vec<ButtonMapping> {
    fn from(map: ButtonMap) -> Self {
        map.entries
    }
}
