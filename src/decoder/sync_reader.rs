//! Master-clocked shift-register read (LATCH/CLOCK/DATA)
//!
//! One frame:
//!
//! ```text
//! LATCH ─┐‾‾12us‾‾┌─ 6us ─────────────────────────────────────
//! CLOCK ──────────────── sample ┌‾6us‾┐ 6us sample ┌‾6us‾┐ 6us ...
//! DATA  ════════════════ bit 0 ═══════════ bit 1 ═══════════ ...
//! ```
//!
//! The first bit is on DATA as soon as the latch drops; every clock pulse
//! advances the pad's shift register by one. The settle times cover the
//! pad's load latency and are fixed by the protocol.

use super::sampler::{BitSampler, Polarity};
use super::word::ButtonWord;
use crate::gpio::{Direction, GpioBus, GpioError, Level, Line};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

pub const LATCH_PULSE_US: u32 = 12;
pub const LATCH_SETTLE_US: u32 = 6;
pub const CLOCK_PULSE_US: u32 = 6;
pub const CLOCK_SETTLE_US: u32 = 6;

/// Lines used by the shift-register protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftLines {
    pub latch: Line,
    pub clock: Line,
    pub data: Line,
}

/// Result of one frame read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShiftFrame {
    pub word: ButtonWord,
    /// Bits whose sample failed and were forced to released
    pub faults: u8,
}

/// Reads one `width`-bit word per call.
///
/// The reader keeps nothing between calls; the accumulator and bit index
/// live only for the duration of [`SyncShiftReader::read_frame`], which owns
/// the three lines while it runs.
#[derive(Clone, Debug)]
pub struct SyncShiftReader {
    lines: ShiftLines,
    width: u8,
    sampler: BitSampler,
}

impl SyncShiftReader {
    pub fn new(lines: ShiftLines, width: u8, polarity: Polarity) -> Self {
        Self {
            lines,
            width,
            sampler: BitSampler::new(lines.data, polarity),
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn lines(&self) -> ShiftLines {
        self.lines
    }

    /// Claims the lines: LATCH and CLOCK as outputs driven low, DATA as input
    pub fn configure<B: GpioBus + ?Sized>(&self, bus: &mut B) -> Result<(), GpioError> {
        bus.configure_direction(self.lines.latch, Direction::Output)?;
        bus.configure_direction(self.lines.clock, Direction::Output)?;
        bus.configure_direction(self.lines.data, Direction::Input)?;
        bus.write(self.lines.latch, Level::Low)?;
        bus.write(self.lines.clock, Level::Low)?;
        Ok(())
    }

    /// Latches the pad and shifts in `width` bits.
    ///
    /// Always returns a full frame: failed samples and failed line writes
    /// degrade the affected bits to released instead of aborting.
    pub fn read_frame<B, D>(&self, bus: &mut B, delay: &mut D) -> ShiftFrame
    where
        B: GpioBus + ?Sized,
        D: DelayNs + ?Sized,
    {
        let mut frame = ShiftFrame::default();

        self.drive(bus, self.lines.latch, Level::High);
        delay.delay_us(LATCH_PULSE_US);
        self.drive(bus, self.lines.latch, Level::Low);
        delay.delay_us(LATCH_SETTLE_US);

        for bit in 0..self.width {
            let sample = self.sampler.sample(bus);
            if sample.is_fault() {
                frame.faults += 1;
            }
            frame.word.set(bit, sample.is_pressed());

            self.drive(bus, self.lines.clock, Level::High);
            delay.delay_us(CLOCK_PULSE_US);
            self.drive(bus, self.lines.clock, Level::Low);
            delay.delay_us(CLOCK_SETTLE_US);
        }

        trace!("Shift frame {}", frame.word.render(self.width));
        frame
    }

    fn drive<B: GpioBus + ?Sized>(&self, bus: &mut B, line: Line, level: Level) {
        if let Err(e) = bus.write(line, level) {
            warn!("Failed to drive {} {:?}: {}", line, level, e);
        }
    }
}
