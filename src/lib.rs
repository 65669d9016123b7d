//! GPIO game-controller decoder
//!
//! Reads a retro game pad wired to GPIO lines and reports button
//! transitions to an input sink. Two wire protocols are supported: the
//! master-clocked shift-register protocol (LATCH/CLOCK/DATA, polled) and a
//! self-clocked serial protocol (DATA plus optional SYNC, edge triggered).

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod gpio;
pub mod sink;
pub mod timing;

pub use acquisition::{AcquisitionError, EdgeAcquisitionHandle, PollerHandle};
pub use config::{Backend, Config, ConfigError, Protocol};
pub use decoder::{ButtonId, ButtonMap, ButtonWord, StateDiffer, TransitionEvent};
pub use gpio::{GpioBus, GpioError, Level, Line};
pub use sink::{InputSink, SinkError};
