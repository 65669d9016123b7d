//! Simulated GPIO backends
//!
//! [`SimulatedBus`] replays scripted input levels (and injected faults) and
//! records every write, which is what the decoder tests are built on.
//! [`ShiftRegisterPad`] behaves like a real shift-register controller wired to
//! LATCH/CLOCK/DATA and backs the `simulated` backend of the daemon.
//! [`SerialWaveform`] plays serial frames back by time instead of by read
//! order, for checking where a reader actually samples.

use super::{Direction, Edge, EdgeEvent, EdgeHandler, GpioBus, GpioError, Level, Line};
use crate::decoder::async_reader::SerialFrameConfig;
use crate::decoder::button::{ButtonId, ButtonMap};
use crate::decoder::word::ButtonWord;
use crate::timing::VirtualClock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, trace};

/// Buttons pressed one at a time by the simulated backend
const PATTERN: [&[ButtonId]; 8] = [
    &[ButtonId::A],
    &[ButtonId::B],
    &[ButtonId::X, ButtonId::C],
    &[ButtonId::Y, ButtonId::D],
    &[ButtonId::Up],
    &[ButtonId::Down],
    &[ButtonId::Left],
    &[ButtonId::Right],
];

/// Test pattern for `map`: every pattern button present in the map pressed
/// on its own, then everything released
pub fn test_pattern(map: &ButtonMap) -> Vec<ButtonWord> {
    PATTERN
        .iter()
        .filter_map(|step| step.iter().find_map(|button| map.bit_of(*button)))
        .map(|bit| ButtonWord::EMPTY.with_pressed(bit))
        .chain(std::iter::once(ButtonWord::EMPTY))
        .collect()
}

/// Scripted GPIO bus.
///
/// Reads on a line first drain that line's script; `None` entries in the
/// script are delivered as [`GpioError::LineFault`]. Once the script is empty
/// the line reads its static level, which defaults to `High` (pulled-up idle
/// line).
#[derive(Default)]
pub struct SimulatedBus {
    directions: HashMap<Line, Direction>,
    levels: HashMap<Line, Level>,
    scripts: HashMap<Line, VecDeque<Option<Level>>>,
    writes: Vec<(Line, Level)>,
    handlers: HashMap<Line, (Edge, EdgeHandler)>,
    unavailable: HashSet<Line>,
    reads: usize,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a line as impossible to claim
    pub fn with_unavailable(mut self, line: Line) -> Self {
        self.unavailable.insert(line);
        self
    }

    pub fn set_level(&mut self, line: Line, level: Level) {
        self.levels.insert(line, level);
    }

    pub fn script_levels(&mut self, line: Line, levels: impl IntoIterator<Item = Level>) {
        self.scripts
            .entry(line)
            .or_default()
            .extend(levels.into_iter().map(Some));
    }

    /// Scripts raw wire values, `0` meaning low and anything else high
    pub fn script_bits(&mut self, line: Line, bits: &[u8]) {
        self.script_levels(line, bits.iter().map(|&b| Level::from(b != 0)));
    }

    pub fn script_fault(&mut self, line: Line) {
        self.scripts.entry(line).or_default().push_back(None);
    }

    /// Scripts the DATA levels a serial pad sends for `word`, one per bit
    /// cell: the start cell, the data bits in sample order and the stop bit
    /// when the frame has one
    pub fn script_serial_frame(&mut self, config: &SerialFrameConfig, word: ButtonWord) {
        self.script_levels(config.data, serial_cells(config, word));
    }

    pub fn pending_reads(&self, line: Line) -> usize {
        self.scripts.get(&line).map_or(0, VecDeque::len)
    }

    pub fn total_reads(&self) -> usize {
        self.reads
    }

    pub fn direction(&self, line: Line) -> Option<Direction> {
        self.directions.get(&line).copied()
    }

    pub fn writes(&self) -> &[(Line, Level)] {
        &self.writes
    }

    pub fn writes_to(&self, line: Line) -> Vec<Level> {
        self.writes
            .iter()
            .filter(|(l, _)| *l == line)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    pub fn has_interrupt(&self, line: Line) -> bool {
        self.handlers.contains_key(&line)
    }

    /// Fires the edge handler registered on `line`, as the interrupt
    /// controller would. Returns false when nothing is registered.
    pub fn fire_edge(&mut self, line: Line) -> bool {
        self.fire_edge_at(line, Instant::now())
    }

    /// Fires an edge that happened on the wire at `timestamp`
    pub fn fire_edge_at(&mut self, line: Line, timestamp: Instant) -> bool {
        match self.handlers.get_mut(&line) {
            Some((edge, handler)) => {
                trace!("Simulated {:?} edge on {}", edge, line);
                handler(EdgeEvent {
                    line,
                    edge: *edge,
                    timestamp,
                });
                true
            }
            None => false,
        }
    }
}

/// Levels on DATA for one serial frame, one entry per bit cell
pub fn serial_cells(config: &SerialFrameConfig, word: ButtonWord) -> Vec<Level> {
    std::iter::once(config.idle_level().toggled())
        .chain((0..config.width).map(|index| {
            let bit = config.bit_order.bit_for_sample(index, config.width);
            config.polarity.level_for(word.is_pressed(bit))
        }))
        .chain(config.stop_bit.then(|| config.idle_level()))
        .collect()
}

/// Serial DATA line driven by a [`VirtualClock`].
///
/// Frames are placed on a timeline; a read returns whatever cell is on the
/// wire at the clock's current time, and the idle level between frames.
pub struct SerialWaveform {
    config: SerialFrameConfig,
    clock: VirtualClock,
    frames: Vec<(u64, Vec<Level>)>,
    reads: Vec<u64>,
}

impl SerialWaveform {
    pub fn new(config: SerialFrameConfig, clock: VirtualClock) -> Self {
        Self {
            config,
            clock,
            frames: Vec::new(),
            reads: Vec::new(),
        }
    }

    /// Puts `word` on the wire with its start edge at `start_ns`
    pub fn transmit_at(&mut self, start_ns: u64, word: ButtonWord) {
        self.frames.push((start_ns, serial_cells(&self.config, word)));
    }

    /// Clock time of every read so far, in nanoseconds
    pub fn read_times(&self) -> &[u64] {
        &self.reads
    }

    fn level_at(&self, now_ns: u64) -> Level {
        let period_ns = u64::from(self.config.bit_period_us()) * 1_000;
        self.frames
            .iter()
            .filter(|(start, _)| *start <= now_ns && period_ns > 0)
            .find_map(|(start, cells)| {
                let cell = usize::try_from((now_ns - start) / period_ns).ok()?;
                cells.get(cell).copied()
            })
            .unwrap_or_else(|| self.config.idle_level())
    }
}

impl GpioBus for SerialWaveform {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        if line == self.config.data && direction == Direction::Input {
            Ok(())
        } else if Some(line) == self.config.sync && direction == Direction::Output {
            Ok(())
        } else {
            Err(GpioError::Unavailable(
                line,
                "not wired to the waveform".to_string(),
            ))
        }
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        if line != self.config.data {
            return Err(GpioError::NotConfigured(line, Direction::Input));
        }
        let now = self.clock.now_ns();
        self.reads.push(now);
        Ok(self.level_at(now))
    }

    fn write(&mut self, line: Line, _level: Level) -> Result<(), GpioError> {
        if Some(line) == self.config.sync {
            Ok(())
        } else {
            Err(GpioError::NotConfigured(line, Direction::Output))
        }
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        _edge: Edge,
        _handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        Err(GpioError::InterruptError(
            line,
            "waveforms are stepped by hand".to_string(),
        ))
    }
}

impl GpioBus for SimulatedBus {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        if self.unavailable.contains(&line) {
            return Err(GpioError::Unavailable(line, "line is reserved".to_string()));
        }
        self.directions.insert(line, direction);
        Ok(())
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        self.reads += 1;
        if let Some(next) = self.scripts.get_mut(&line).and_then(VecDeque::pop_front) {
            return next.ok_or(GpioError::LineFault(line));
        }
        Ok(self.levels.get(&line).copied().unwrap_or(Level::High))
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        if self.unavailable.contains(&line) {
            return Err(GpioError::LineFault(line));
        }
        self.writes.push((line, level));
        self.levels.insert(line, level);
        Ok(())
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        if self.unavailable.contains(&line) {
            return Err(GpioError::InterruptError(
                line,
                "line is reserved".to_string(),
            ));
        }
        self.handlers.insert(line, (edge, handler));
        Ok(())
    }
}

/// Emulated shift-register game pad.
///
/// While LATCH is high the register continuously reloads from the current
/// button state. Every rising CLOCK edge shifts the next bit onto DATA.
/// DATA is active-low: a pressed button reads `Low`. Once all bits have been
/// shifted out DATA idles high.
pub struct ShiftRegisterPad {
    latch: Line,
    clock: Line,
    data: Line,
    width: u8,
    buttons: ButtonWord,
    register: u16,
    shifted: u8,
    latch_level: Level,
    clock_level: Level,
    latch_pulses: u64,
}

impl ShiftRegisterPad {
    pub fn new(latch: Line, clock: Line, data: Line, width: u8) -> Self {
        Self {
            latch,
            clock,
            data,
            width,
            buttons: ButtonWord::EMPTY,
            register: 0,
            shifted: 0,
            latch_level: Level::Low,
            clock_level: Level::Low,
            latch_pulses: 0,
        }
    }

    pub fn set_buttons(&mut self, buttons: ButtonWord) {
        self.buttons = buttons;
    }

    pub fn buttons(&self) -> ButtonWord {
        self.buttons
    }

    /// Number of completed latch pulses, one per frame read by a master
    pub fn latch_pulses(&self) -> u64 {
        self.latch_pulses
    }

    fn reload(&mut self) {
        self.register = self.buttons.bits();
        self.shifted = 0;
    }
}

impl GpioBus for ShiftRegisterPad {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        let expected = if line == self.data {
            Direction::Input
        } else if line == self.latch || line == self.clock {
            Direction::Output
        } else {
            return Err(GpioError::Unavailable(
                line,
                "not wired to the pad".to_string(),
            ));
        };

        if direction != expected {
            return Err(GpioError::NotConfigured(line, expected));
        }
        Ok(())
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        if line != self.data {
            return Err(GpioError::NotConfigured(line, Direction::Input));
        }
        if self.latch_level == Level::High {
            self.reload();
        }
        if self.shifted >= self.width {
            return Ok(Level::High);
        }
        let pressed = (self.register >> self.shifted) & 1 == 1;
        Ok(Level::from(!pressed))
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        if line == self.latch {
            match (self.latch_level, level) {
                (_, Level::High) => self.reload(),
                (Level::High, Level::Low) => {
                    self.latch_pulses += 1;
                    debug!("Pad latched {:#06x}", self.register);
                }
                _ => {}
            }
            self.latch_level = level;
            Ok(())
        } else if line == self.clock {
            if self.clock_level == Level::Low && level == Level::High {
                self.shifted = self.shifted.saturating_add(1);
            }
            self.clock_level = level;
            Ok(())
        } else {
            Err(GpioError::NotConfigured(line, Direction::Output))
        }
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        _edge: Edge,
        _handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        Err(GpioError::InterruptError(
            line,
            "shift-register pads have no interrupt line".to_string(),
        ))
    }
}
