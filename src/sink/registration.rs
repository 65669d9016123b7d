//! Host device registration
//!
//! Announcing a game pad to the host input subsystem (name, bus, key bits)
//! is host glue. The decoder only needs something that turns a device
//! description into an [`InputSink`]; [`DeviceRegistrar`] is that seam.

use super::{ChannelSink, InputFrame, InputSink, SinkError};
use crate::decoder::button::ButtonId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    Host,
    Virtual,
}

/// How the pad presents itself to the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub name: String,
    pub phys: String,
    pub bus: BusType,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            name: "NES Joystick (GPIO)".to_string(),
            phys: "gpiojoy/input0".to_string(),
            bus: BusType::Host,
            vendor: 0x0001,
            product: 0x0001,
            version: 0x0001,
        }
    }
}

pub trait DeviceRegistrar {
    /// Registers a device able to report `buttons` and returns its sink
    fn register(
        &mut self,
        identity: &DeviceIdentity,
        buttons: &[ButtonId],
    ) -> Result<Box<dyn InputSink + Send>, SinkError>;
}

/// Registrar whose devices publish [`InputFrame`]s on a shared channel
pub struct ChannelRegistrar {
    sender: mpsc::Sender<InputFrame>,
}

impl ChannelRegistrar {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InputFrame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        debug!("Created input frame channel with capacity {}", capacity);
        (Self { sender }, receiver)
    }
}

impl DeviceRegistrar for ChannelRegistrar {
    fn register(
        &mut self,
        identity: &DeviceIdentity,
        buttons: &[ButtonId],
    ) -> Result<Box<dyn InputSink + Send>, SinkError> {
        if buttons.is_empty() {
            return Err(SinkError::Registration(format!(
                "{} declares no buttons",
                identity.name
            )));
        }
        if self.sender.is_closed() {
            return Err(SinkError::Registration(
                "input frame receiver dropped".to_string(),
            ));
        }

        info!(
            "Registered input device '{}' ({}) bus={:?} id={:04x}:{:04x} v{:04x} with {} buttons",
            identity.name,
            identity.phys,
            identity.bus,
            identity.vendor,
            identity.product,
            identity.version,
            buttons.len()
        );
        Ok(Box::new(ChannelSink::new(self.sender.clone())))
    }
}
