//! Raspberry Pi GPIO backend built on rppal
//!
//! Pins are claimed lazily by [`GpioBus::configure_direction`]. A line that
//! cannot be claimed (already exported, wrong board, missing permissions on
//! `/dev/gpiomem`) surfaces as [`GpioError::Unavailable`], which the
//! acquisition layer reports as a fatal setup error.

use super::{Direction, Edge, EdgeEvent, EdgeHandler, GpioBus, GpioError, Level, Line};
use rppal::gpio::{self, Gpio, InputPin, OutputPin, Trigger};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct RppalBus {
    gpio: Gpio,
    inputs: HashMap<Line, InputPin>,
    outputs: HashMap<Line, OutputPin>,
}

impl RppalBus {
    pub fn new() -> Result<Self, GpioError> {
        info!("Opening GPIO controller");
        let gpio = Gpio::new()?;
        Ok(Self {
            gpio,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        })
    }
}

impl GpioBus for RppalBus {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        // Drop any previous claim on the line before re-acquiring it
        self.inputs.remove(&line);
        self.outputs.remove(&line);

        let pin = self
            .gpio
            .get(line.0)
            .map_err(|e| GpioError::Unavailable(line, e.to_string()))?;

        match direction {
            Direction::Input => {
                self.inputs.insert(line, pin.into_input());
            }
            Direction::Output => {
                self.outputs.insert(line, pin.into_output_low());
            }
        }
        debug!("Configured {} as {:?}", line, direction);
        Ok(())
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        let pin = self
            .inputs
            .get(&line)
            .ok_or(GpioError::NotConfigured(line, Direction::Input))?;
        Ok(pin.read().into())
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        let pin = self
            .outputs
            .get_mut(&line)
            .ok_or(GpioError::NotConfigured(line, Direction::Output))?;
        pin.write(level.into());
        Ok(())
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        mut handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        let pin = self
            .inputs
            .get_mut(&line)
            .ok_or(GpioError::NotConfigured(line, Direction::Input))?;

        let mut clock = KernelClock::default();
        pin.set_async_interrupt(edge.into(), None, move |event: gpio::Event| {
            handler(EdgeEvent {
                line,
                edge,
                timestamp: clock.instant_of(event.timestamp),
            })
        })
        .map_err(|e| GpioError::InterruptError(line, e.to_string()))?;

        info!("Registered {:?} edge interrupt on {}", edge, line);
        Ok(())
    }
}

/// Maps kernel edge timestamps onto [`Instant`].
///
/// The kernel stamps each edge with the time since boot when the interrupt
/// fired; the callback runs some time later on rppal's interrupt thread. The
/// offset between the two clocks is estimated as the smallest
/// `callback time - kernel time` seen so far, which converges on the true
/// offset as soon as one callback runs promptly.
#[derive(Debug, Default)]
struct KernelClock {
    base: Option<Instant>,
}

impl KernelClock {
    fn instant_of(&mut self, since_boot: Duration) -> Instant {
        let now = Instant::now();
        let Some(candidate) = now.checked_sub(since_boot) else {
            return now;
        };
        let base = match self.base {
            Some(base) if base <= candidate => base,
            _ => candidate,
        };
        self.base = Some(base);
        (base + since_boot).min(now)
    }
}

impl From<gpio::Level> for Level {
    fn from(level: gpio::Level) -> Self {
        match level {
            gpio::Level::Low => Level::Low,
            gpio::Level::High => Level::High,
        }
    }
}

impl From<Level> for gpio::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        }
    }
}

impl From<Edge> for Trigger {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Falling => Trigger::FallingEdge,
            Edge::Rising => Trigger::RisingEdge,
        }
    }
}
