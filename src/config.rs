//! Daemon configuration
//!
//! Loaded from a TOML file, by default `~/.config/gpiojoy/config.toml`. A
//! missing file is replaced by the defaults written to disk, so a fresh
//! install starts with a documented, editable file. Every section falls back
//! to its defaults when absent.
//!
//! ```toml
//! backend = "rppal"
//!
//! [device]
//! name = "NES Joystick (GPIO)"
//!
//! [decoder]
//! protocol = "shift_register"
//!
//! [decoder.shift_register]
//! latch = 5
//! clock = 6
//! data = 13
//! width = 11
//! poll_interval_ms = 2
//! ```

use crate::decoder::async_reader::{AnomalyPolicy, SerialFrameConfig, DEFAULT_BIT_RATE};
use crate::decoder::button::{ButtonMap, ButtonMapError};
use crate::decoder::sampler::Polarity;
use crate::decoder::sync_reader::{ShiftLines, SyncShiftReader};
use crate::decoder::word::{BitOrder, MAX_WIDTH, SERIAL_WIDTH, SHIFT_REGISTER_WIDTH};
use crate::gpio::{Edge, Line};
use crate::sink::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/gpiojoy";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "GPIOJOY_CONFIG";

/// Shortest allowed polling period
pub const MIN_POLL_INTERVAL_MS: u64 = 1;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Word width {0} is outside 1..=16")]
    InvalidWidth(u8),

    #[error("Invalid button map: {0}")]
    ButtonMap(#[from] ButtonMapError),

    #[error("No default button map for a {0}-bit word, configure `buttons`")]
    MissingButtonMap(u8),

    #[error("{0} is assigned to more than one signal")]
    LineConflict(Line),

    #[error("Bit rate {0} is not usable (needs a bit period of at least 2us)")]
    InvalidBitRate(u32),
}

/// Where GPIO levels come from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Raspberry Pi GPIO through rppal
    #[default]
    Rppal,
    /// Built-in simulated pad cycling through a test pattern
    Simulated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    ShiftRegister,
    Serial,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub device: DeviceIdentity,
    pub decoder: DecoderConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct DecoderConfig {
    pub protocol: Protocol,
    pub shift_register: ShiftRegisterConfig,
    pub serial: SerialConfig,
}

/// Master-clocked protocol settings
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ShiftRegisterConfig {
    pub latch: Line,
    pub clock: Line,
    pub data: Line,
    pub width: u8,
    pub poll_interval_ms: u64,
    pub polarity: Polarity,
    /// Defaults to the built-in layout for 10 or 11 bit words
    pub buttons: Option<ButtonMap>,
}

impl Default for ShiftRegisterConfig {
    fn default() -> Self {
        Self {
            latch: Line(5),
            clock: Line(6),
            data: Line(13),
            width: SHIFT_REGISTER_WIDTH,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            polarity: Polarity::ActiveLow,
            buttons: None,
        }
    }
}

impl ShiftRegisterConfig {
    pub fn lines(&self) -> ShiftLines {
        ShiftLines {
            latch: self.latch,
            clock: self.clock,
            data: self.data,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn button_map(&self) -> Result<ButtonMap, ConfigError> {
        let map = match &self.buttons {
            Some(map) => map.clone(),
            None => match self.width {
                11 => ButtonMap::nes_extended(),
                10 => ButtonMap::legacy_ten_bit(),
                width => return Err(ConfigError::MissingButtonMap(width)),
            },
        };
        map.check_width(self.width)?;
        Ok(map)
    }

    pub fn reader(&self) -> SyncShiftReader {
        SyncShiftReader::new(self.lines(), self.width, self.polarity)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        check_width(self.width)?;
        check_distinct(&[self.latch, self.clock, self.data])?;
        self.button_map()?;

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            warn!(
                "poll_interval_ms {} below the {}ms floor, clamping",
                self.poll_interval_ms, MIN_POLL_INTERVAL_MS
            );
            self.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        }
        Ok(())
    }
}

/// Self-clocked protocol settings
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct SerialConfig {
    pub data: Line,
    pub sync: Option<Line>,
    pub width: u8,
    pub bit_rate: u32,
    pub start_edge: Edge,
    pub bit_order: BitOrder,
    pub polarity: Polarity,
    pub stop_bit: bool,
    pub anomaly_policy: AnomalyPolicy,
    pub buttons: Option<ButtonMap>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            data: Line(17),
            sync: None,
            width: SERIAL_WIDTH,
            bit_rate: DEFAULT_BIT_RATE,
            start_edge: Edge::Falling,
            bit_order: BitOrder::LsbFirst,
            polarity: Polarity::ActiveHigh,
            stop_bit: false,
            anomaly_policy: AnomalyPolicy::Publish,
            buttons: None,
        }
    }
}

impl SerialConfig {
    pub fn button_map(&self) -> Result<ButtonMap, ConfigError> {
        let map = match &self.buttons {
            Some(map) => map.clone(),
            None if self.width >= SHIFT_REGISTER_WIDTH => ButtonMap::serial_sixteen(),
            None => return Err(ConfigError::MissingButtonMap(self.width)),
        };
        map.check_width(self.width)?;
        Ok(map)
    }

    pub fn frame_config(&self) -> SerialFrameConfig {
        SerialFrameConfig {
            data: self.data,
            sync: self.sync,
            width: self.width,
            bit_rate: self.bit_rate,
            start_edge: self.start_edge,
            bit_order: self.bit_order,
            polarity: self.polarity,
            stop_bit: self.stop_bit,
            anomaly_policy: self.anomaly_policy,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_width(self.width)?;
        if self.frame_config().bit_period_us() < 2 {
            return Err(ConfigError::InvalidBitRate(self.bit_rate));
        }
        let mut lines = vec![self.data];
        lines.extend(self.sync);
        check_distinct(&lines)?;
        self.button_map()?;
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Period of the statistics log line
    pub stats_interval_secs: u64,
    /// Frames buffered between the decoder and the input consumer
    pub sink_capacity: usize,
    /// How long the simulated pad holds each test-pattern step
    pub pattern_step_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 30,
            sink_capacity: 256,
            pattern_step_ms: 500,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the section of the active protocol; the other one is ignored
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        match self.decoder.protocol {
            Protocol::ShiftRegister => self.decoder.shift_register.validate()?,
            Protocol::Serial => self.decoder.serial.validate()?,
        }
        if self.runtime.sink_capacity == 0 {
            warn!("sink_capacity 0 is not usable, using 1");
            self.runtime.sink_capacity = 1;
        }
        Ok(())
    }

    /// Picks the configuration file: explicit argument, then the
    /// `GPIOJOY_CONFIG` variable, then the per-user default
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var(CONFIG_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(default_path)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded configuration from {} (protocol {:?}, backend {:?})",
            path.display(),
            config.decoder.protocol,
            config.backend
        );
        Ok(config)
    }

    /// Writes the default configuration if `path` does not exist yet
    pub async fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if tokio::fs::try_exists(path).await.map_err(io_err)? {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = Config::default().to_toml_string()?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}

fn default_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn check_width(width: u8) -> Result<(), ConfigError> {
    if width == 0 || width > MAX_WIDTH {
        return Err(ConfigError::InvalidWidth(width));
    }
    Ok(())
}

fn check_distinct(lines: &[Line]) -> Result<(), ConfigError> {
    for (i, line) in lines.iter().enumerate() {
        if lines[i + 1..].contains(line) {
            return Err(ConfigError::LineConflict(*line));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let text = Config::default().to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.decoder.protocol, Protocol::ShiftRegister);
        assert_eq!(parsed.decoder.shift_register.width, 11);
        assert_eq!(parsed.decoder.serial.bit_rate, 9600);
    }

    #[test]
    fn test_check_distinct() {
        assert!(check_distinct(&[Line(1), Line(2), Line(3)]).is_ok());
        assert!(matches!(
            check_distinct(&[Line(1), Line(2), Line(1)]),
            Err(ConfigError::LineConflict(Line(1)))
        ));
    }
}
