//! Self-clocked serial frame reader
//!
//! The pad announces a frame with a start edge on DATA, holds the line away
//! from idle for one start cell and then clocks out `width` bits at an agreed
//! bit rate, with no clock line. The reader checks the start cell half a bit
//! period after the edge, then samples once per bit period so every data
//! sample lands mid-cell:
//!
//! ```text
//! DATA ‾‾‾‾┐ start │ bit0 │ bit1 │ ... │ bit15 │ (stop) ‾‾‾‾
//!          ↑edge ↑½T     ↑1½T   ↑2½T          ↑16½T   ↑17½T
//! ```
//!
//! A start cell that already reads idle was a glitch and the frame is
//! dropped before any data is taken.
//!
//! The reader is a plain state machine: an edge moves it from `Idle` into
//! `StartBit`, and every [`AsyncFrameReader::tick`] takes exactly one sample.
//! [`AsyncFrameReader::next_delay_us`] tells the driver how long to wait
//! before the next tick, which lets tests step through a frame without real
//! delays. [`AsyncFrameReader::read_frame_from`] anchors every sample to the
//! edge timestamp instead, so time spent getting to the reader does not
//! shift the samples.

use super::sampler::{BitSampler, Polarity, Sample};
use super::word::{BitOrder, ButtonWord, SERIAL_WIDTH};
use crate::gpio::{Direction, Edge, GpioBus, GpioError, Level, Line};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub const DEFAULT_BIT_RATE: u32 = 9600;

/// Bit period in microseconds for `bit_rate` symbols per second, rounded
pub const fn bit_period_us(bit_rate: u32) -> u32 {
    if bit_rate == 0 {
        return 0;
    }
    (1_000_000 + bit_rate / 2) / bit_rate
}

/// What happens to a frame that saw a line fault or a bad stop bit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPolicy {
    /// Publish the frame; faulted bits read as released
    #[default]
    Publish,
    /// Drop the frame unpublished and wait for the next start edge
    Discard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialFrameConfig {
    pub data: Line,
    /// Handshake output toggled once per completed frame
    pub sync: Option<Line>,
    pub width: u8,
    pub bit_rate: u32,
    pub start_edge: Edge,
    pub bit_order: BitOrder,
    pub polarity: Polarity,
    /// Expect one idle-level bit after the data bits
    pub stop_bit: bool,
    pub anomaly_policy: AnomalyPolicy,
}

impl SerialFrameConfig {
    pub fn new(data: Line) -> Self {
        Self {
            data,
            sync: None,
            width: SERIAL_WIDTH,
            bit_rate: DEFAULT_BIT_RATE,
            start_edge: Edge::Falling,
            bit_order: BitOrder::LsbFirst,
            polarity: Polarity::ActiveHigh,
            stop_bit: false,
            anomaly_policy: AnomalyPolicy::Publish,
        }
    }

    pub fn bit_period_us(&self) -> u32 {
        bit_period_us(self.bit_rate)
    }

    pub fn bit_period(&self) -> Duration {
        Duration::from_micros(u64::from(self.bit_period_us()))
    }

    /// Level the data line rests at between frames
    pub fn idle_level(&self) -> Level {
        match self.start_edge {
            Edge::Falling => Level::High,
            Edge::Rising => Level::Low,
        }
    }

    /// Bit cells on the wire per frame, start cell included
    pub fn cells(&self) -> u32 {
        1 + u32::from(self.width) + u32::from(self.stop_bit)
    }

    /// Time from the start edge to the end of the last cell
    pub fn frame_duration(&self) -> Duration {
        self.bit_period() * self.cells()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    StartBit,
    Sampling { bit_index: u8 },
    StopBit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeOutcome {
    Started,
    /// A frame was already being sampled
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialFrame {
    pub word: ButtonWord,
    pub faults: u8,
    pub bad_stop_bit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbandonReason {
    LineFault { faults: u8 },
    BadStopBit,
    /// The start cell read idle; the edge was noise
    FalseStart,
    /// The reader got to a sample too late to land in its cell
    Late,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Complete(SerialFrame),
    Abandoned(AbandonReason),
}

#[derive(Debug)]
pub struct AsyncFrameReader {
    config: SerialFrameConfig,
    sampler: BitSampler,
    phase: FramePhase,
    accumulator: ButtonWord,
    faults: u8,
    bad_stop_bit: bool,
    handshake_level: Level,
    ignored_edges: u64,
}

impl AsyncFrameReader {
    pub fn new(config: SerialFrameConfig) -> Self {
        Self {
            sampler: BitSampler::new(config.data, config.polarity),
            config,
            phase: FramePhase::Idle,
            accumulator: ButtonWord::EMPTY,
            faults: 0,
            bad_stop_bit: false,
            handshake_level: Level::Low,
            ignored_edges: 0,
        }
    }

    pub fn config(&self) -> &SerialFrameConfig {
        &self.config
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn is_sampling(&self) -> bool {
        self.phase != FramePhase::Idle
    }

    /// Start edges dropped because a frame was in progress
    pub fn ignored_edges(&self) -> u64 {
        self.ignored_edges
    }

    pub fn handshake_level(&self) -> Level {
        self.handshake_level
    }

    /// Claims DATA as input and, if configured, SYNC as output driven low
    pub fn configure<B: GpioBus + ?Sized>(&mut self, bus: &mut B) -> Result<(), GpioError> {
        bus.configure_direction(self.config.data, Direction::Input)?;
        if let Some(sync) = self.config.sync {
            bus.configure_direction(sync, Direction::Output)?;
            bus.write(sync, Level::Low)?;
            self.handshake_level = Level::Low;
        }
        Ok(())
    }

    pub fn on_start_edge(&mut self) -> EdgeOutcome {
        match self.phase {
            FramePhase::Idle => {
                self.reset_accumulation();
                self.phase = FramePhase::StartBit;
                trace!("Start edge, sampling {} bits", self.config.width);
                EdgeOutcome::Started
            }
            _ => {
                self.ignored_edges += 1;
                debug!("Start edge during {:?} ignored", self.phase);
                EdgeOutcome::Ignored
            }
        }
    }

    /// Delay before the next tick, `None` while idle.
    ///
    /// Half a bit period before the start-cell check, one full period before
    /// every later sample.
    pub fn next_delay_us(&self) -> Option<u32> {
        let period = self.config.bit_period_us();
        match self.phase {
            FramePhase::Idle => None,
            FramePhase::StartBit => Some(period / 2),
            FramePhase::Sampling { .. } | FramePhase::StopBit => Some(period),
        }
    }

    /// When the next tick is due, measured from the start edge
    pub fn next_sample_offset(&self) -> Option<Duration> {
        let period = self.config.bit_period();
        let half = period / 2;
        match self.phase {
            FramePhase::Idle => None,
            FramePhase::StartBit => Some(half),
            FramePhase::Sampling { bit_index } => {
                Some(half + period * (u32::from(bit_index) + 1))
            }
            FramePhase::StopBit => Some(half + period * (u32::from(self.config.width) + 1)),
        }
    }

    /// Takes one sample. Returns the outcome once the frame is finished.
    pub fn tick<B: GpioBus + ?Sized>(&mut self, bus: &mut B) -> Option<FrameOutcome> {
        match self.phase {
            FramePhase::Idle => None,
            FramePhase::StartBit => {
                match bus.read(self.config.data) {
                    Ok(level) if level == self.config.idle_level() => {
                        debug!("Start cell read {:?}, dropping edge", level);
                        self.abandon();
                        return Some(FrameOutcome::Abandoned(AbandonReason::FalseStart));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Start cell sample failed: {}", e);
                        self.faults += 1;
                    }
                }
                self.phase = FramePhase::Sampling { bit_index: 0 };
                None
            }
            FramePhase::Sampling { bit_index } => {
                let sample = self.sampler.sample(bus);
                if sample == Sample::Fault {
                    self.faults += 1;
                }
                let bit = self
                    .config
                    .bit_order
                    .bit_for_sample(bit_index, self.config.width);
                self.accumulator.set(bit, sample.is_pressed());

                let next = bit_index + 1;
                if next < self.config.width {
                    self.phase = FramePhase::Sampling { bit_index: next };
                    None
                } else if self.config.stop_bit {
                    self.phase = FramePhase::StopBit;
                    None
                } else {
                    Some(self.finish(bus))
                }
            }
            FramePhase::StopBit => {
                match bus.read(self.config.data) {
                    Ok(level) if level == self.config.idle_level() => {}
                    Ok(level) => {
                        debug!("Stop bit read {:?}", level);
                        self.bad_stop_bit = true;
                    }
                    Err(e) => {
                        debug!("Stop bit sample failed: {}", e);
                        self.faults += 1;
                    }
                }
                Some(self.finish(bus))
            }
        }
    }

    /// Drops a frame in progress without publishing anything
    pub fn abandon(&mut self) -> bool {
        let was_sampling = self.is_sampling();
        self.phase = FramePhase::Idle;
        self.reset_accumulation();
        was_sampling
    }

    /// Runs the frame started by the last edge to completion, waiting
    /// between samples. Returns `None` when no frame was started.
    pub fn read_frame<B, D>(&mut self, bus: &mut B, delay: &mut D) -> Option<FrameOutcome>
    where
        B: GpioBus + ?Sized,
        D: DelayNs + ?Sized,
    {
        while let Some(wait) = self.next_delay_us() {
            delay.delay_us(wait);
            if let Some(outcome) = self.tick(bus) {
                return Some(outcome);
            }
        }
        None
    }

    /// Runs the frame whose start edge happened at `edge`.
    ///
    /// Every sample is due at a fixed offset from `edge` and `delay` only
    /// covers the time still left until then. A sample reached more than half
    /// a bit period after its due time would read the following cell, so the
    /// frame is abandoned as [`AbandonReason::Late`] instead.
    pub fn read_frame_from<B, D>(
        &mut self,
        bus: &mut B,
        delay: &mut D,
        edge: Instant,
    ) -> Option<FrameOutcome>
    where
        B: GpioBus + ?Sized,
        D: DelayNs + ?Sized,
    {
        let slack = self.config.bit_period() / 2;
        while let Some(offset) = self.next_sample_offset() {
            let due = edge + offset;
            let now = Instant::now();
            if now > due + slack {
                debug!(
                    "Sample {:?} due {:?} after the edge reached {:?} late",
                    self.phase,
                    offset,
                    now - due
                );
                self.abandon();
                return Some(FrameOutcome::Abandoned(AbandonReason::Late));
            }
            if let Some(left) = due.checked_duration_since(now) {
                delay.delay_ns(u32::try_from(left.as_nanos()).unwrap_or(u32::MAX));
            }
            if let Some(outcome) = self.tick(bus) {
                return Some(outcome);
            }
        }
        None
    }

    fn finish<B: GpioBus + ?Sized>(&mut self, bus: &mut B) -> FrameOutcome {
        let frame = SerialFrame {
            word: self.accumulator,
            faults: self.faults,
            bad_stop_bit: self.bad_stop_bit,
        };
        self.phase = FramePhase::Idle;
        self.reset_accumulation();

        let anomalous = frame.faults > 0 || frame.bad_stop_bit;
        if anomalous && self.config.anomaly_policy == AnomalyPolicy::Discard {
            let reason = if frame.bad_stop_bit {
                AbandonReason::BadStopBit
            } else {
                AbandonReason::LineFault {
                    faults: frame.faults,
                }
            };
            debug!("Discarding serial frame: {:?}", reason);
            return FrameOutcome::Abandoned(reason);
        }

        if let Some(sync) = self.config.sync {
            self.handshake_level = self.handshake_level.toggled();
            if let Err(e) = bus.write(sync, self.handshake_level) {
                warn!("Failed to toggle handshake line {}: {}", sync, e);
            }
        }

        trace!("Serial frame {}", frame.word.render(self.config.width));
        FrameOutcome::Complete(frame)
    }

    fn reset_accumulation(&mut self) {
        self.accumulator = ButtonWord::EMPTY;
        self.faults = 0;
        self.bad_stop_bit = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::sim::SimulatedBus;
    use crate::timing::RecordedDelay;

    const DATA: Line = Line(17);

    #[test]
    fn test_bit_period() {
        assert_eq!(bit_period_us(9600), 104);
        assert_eq!(bit_period_us(115_200), 9);
        assert_eq!(bit_period_us(0), 0);
    }

    #[test]
    fn test_idle_reader_does_nothing() {
        let mut bus = SimulatedBus::new();
        let mut reader = AsyncFrameReader::new(SerialFrameConfig::new(DATA));
        assert_eq!(reader.next_delay_us(), None);
        assert_eq!(reader.tick(&mut bus), None);
        assert_eq!(reader.read_frame(&mut bus, &mut RecordedDelay::new()), None);
        assert_eq!(bus.total_reads(), 0);
    }

    #[test]
    fn test_sampling_schedule() {
        let mut bus = SimulatedBus::new();
        let mut delay = RecordedDelay::new();
        let mut reader = AsyncFrameReader::new(SerialFrameConfig::new(DATA));

        bus.script_bits(DATA, &[0]);
        reader.on_start_edge();
        reader.read_frame(&mut bus, &mut delay);

        // Start-cell check, then one period per data bit
        let delays = delay.delays();
        assert_eq!(delays.len(), 17);
        assert_eq!(delays[0], 52);
        assert!(delays[1..].iter().all(|&d| d == 104));
    }

    #[test]
    fn test_sample_offsets_from_edge() {
        let mut config = SerialFrameConfig::new(DATA);
        config.width = 2;
        config.stop_bit = true;
        let mut bus = SimulatedBus::new();
        bus.script_bits(DATA, &[0, 1, 1, 1]);
        let mut reader = AsyncFrameReader::new(config);
        reader.on_start_edge();

        let mut offsets = Vec::new();
        while let Some(offset) = reader.next_sample_offset() {
            offsets.push(offset.as_micros());
            reader.tick(&mut bus);
        }
        assert_eq!(offsets, vec![52, 156, 260, 364]);
        assert_eq!(config.frame_duration(), Duration::from_micros(416));
    }

    #[test]
    fn test_idle_start_cell_is_a_false_start() {
        let mut bus = SimulatedBus::new();
        let mut reader = AsyncFrameReader::new(SerialFrameConfig::new(DATA));

        reader.on_start_edge();
        assert_eq!(
            reader.tick(&mut bus),
            Some(FrameOutcome::Abandoned(AbandonReason::FalseStart))
        );
        assert_eq!(reader.phase(), FramePhase::Idle);
        assert_eq!(bus.total_reads(), 1);
    }

    #[test]
    fn test_msb_first() {
        let mut bus = SimulatedBus::new();
        let mut config = SerialFrameConfig::new(DATA);
        config.bit_order = BitOrder::MsbFirst;
        let mut reader = AsyncFrameReader::new(config);

        let mut bits = [0u8; 17];
        bits[1] = 1;
        bus.script_bits(DATA, &bits);

        reader.on_start_edge();
        match reader.read_frame(&mut bus, &mut RecordedDelay::new()) {
            Some(FrameOutcome::Complete(frame)) => assert_eq!(frame.word.bits(), 0x8000),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_abandon_returns_to_idle() {
        let mut bus = SimulatedBus::new();
        let mut reader = AsyncFrameReader::new(SerialFrameConfig::new(DATA));
        bus.script_bits(DATA, &[0]);
        reader.on_start_edge();
        reader.tick(&mut bus);

        assert!(reader.abandon());
        assert_eq!(reader.phase(), FramePhase::Idle);
        assert!(!reader.abandon());
    }
}
