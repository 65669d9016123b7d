//! GPIO boundary for the decoder
//!
//! The decoder only ever issues five kinds of requests against the hardware:
//! configure a line's direction, read a level, write a level and register an
//! edge interrupt. [`GpioBus`] captures exactly that surface so the decoding
//! core can run against real pins ([`rppal_bus::RppalBus`]) or against the
//! simulators in [`sim`] without changes.
//!
//! # Architecture
//!
//! ```text
//! Decoder ──► GpioBus ──► RppalBus         (Raspberry Pi, /dev/gpiomem)
//!                    └──► SimulatedBus     (scripted levels and faults)
//!                    └──► ShiftRegisterPad (emulated LATCH/CLOCK peripheral)
//! ```

pub mod rppal_bus;
pub mod sim;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A GPIO line, identified by its BCM number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Line(pub u8);

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

// Logical level on a line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Which transition fires an edge interrupt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Falling,
    Rising,
}

/// One edge seen on a line with an interrupt registered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub line: Line,
    pub edge: Edge,
    /// When the edge happened on the wire, not when the handler ran
    pub timestamp: Instant,
}

/// Callback run from the interrupt context when a registered edge fires.
///
/// Handlers must return quickly; anything heavier than flipping a flag and
/// notifying another thread belongs outside the interrupt context.
pub type EdgeHandler = Box<dyn FnMut(EdgeEvent) + Send + 'static>;

/// Errors raised at the GPIO boundary
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Line {0} is unavailable: {1}")]
    Unavailable(Line, String),

    #[error("Line {0} is not configured as {1:?}")]
    NotConfigured(Line, Direction),

    #[error("Line fault on {0}")]
    LineFault(Line),

    #[error("Failed to register edge interrupt on {0}: {1}")]
    InterruptError(Line, String),

    #[error("GPIO controller error: {0}")]
    Controller(#[from] rppal::gpio::Error),
}

/// The GPIO operations the decoder relies on
pub trait GpioBus {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError>;

    fn read(&mut self, line: Line) -> Result<Level, GpioError>;

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError>;

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<(), GpioError>;
}

impl<B: GpioBus + ?Sized> GpioBus for Box<B> {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        (**self).configure_direction(line, direction)
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        (**self).read(line)
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        (**self).write(line, level)
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        (**self).register_edge_interrupt(line, edge, handler)
    }
}

/// A bus shared between threads behind a mutex.
///
/// Used when a simulator has to be driven (new frames scripted, edges fired)
/// while a decoder thread is reading from it. The lock is taken per
/// operation, never across a whole frame.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// Runs `f` with exclusive access to the wrapped bus
    pub fn with<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        // A panicked holder leaves the simulator in a usable state, so the
        // poison flag is ignored.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl<B: GpioBus> GpioBus for SharedBus<B> {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        self.with(|bus| bus.configure_direction(line, direction))
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        self.with(|bus| bus.read(line))
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        self.with(|bus| bus.write(line, level))
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        self.with(|bus| bus.register_edge_interrupt(line, edge, handler))
    }
}
