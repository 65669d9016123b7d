//! Input sink boundary
//!
//! The decoder hands its results to an [`InputSink`]: one `report` per
//! button transition, then exactly one `sync` that closes the frame. All
//! reports of a frame come before its sync, and two frames never interleave.
//!
//! # Implementations
//!
//! - [`ChannelSink`] buffers a frame and sends it as a single [`InputFrame`]
//!   over a tokio channel, so a consumer always sees whole frames
//! - [`LogSink`] writes transitions to the tracing log
//! - [`RecordingSink`] keeps every call in memory for inspection
//!
//! Obtaining a sink for a concrete host device goes through the
//! [`registration::DeviceRegistrar`] trait.

pub mod registration;

use crate::decoder::button::ButtonId;
use crate::decoder::differ::TransitionEvent;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use registration::{BusType, ChannelRegistrar, DeviceIdentity, DeviceRegistrar};

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink channel closed: {0}")]
    Closed(String),

    #[error("Sink is full: {0}")]
    Full(String),

    #[error("Device registration failed: {0}")]
    Registration(String),
}

pub trait InputSink {
    fn report(&mut self, button: ButtonId, pressed: bool) -> Result<(), SinkError>;

    /// Marks the end of a frame. Called once per frame, even without reports.
    fn sync(&mut self) -> Result<(), SinkError>;
}

impl<S: InputSink + ?Sized> InputSink for Box<S> {
    fn report(&mut self, button: ButtonId, pressed: bool) -> Result<(), SinkError> {
        (**self).report(button, pressed)
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        (**self).sync()
    }
}

/// All transitions of one frame, delivered at its sync
#[derive(Clone, Debug)]
pub struct InputFrame {
    pub sequence: u64,
    pub events: Vec<TransitionEvent>,
    pub timestamp: DateTime<Local>,
}

/// Forwards whole frames over a bounded tokio channel.
///
/// Never blocks: a full channel rejects the frame with [`SinkError::Full`]
/// so the caller can retry the same transitions with its next frame.
pub struct ChannelSink {
    sender: mpsc::Sender<InputFrame>,
    pending: Vec<TransitionEvent>,
    sequence: u64,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<InputFrame>) -> Self {
        Self {
            sender,
            pending: Vec::new(),
            sequence: 0,
        }
    }
}

impl InputSink for ChannelSink {
    fn report(&mut self, button: ButtonId, pressed: bool) -> Result<(), SinkError> {
        self.pending.push(TransitionEvent { button, pressed });
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        let frame = InputFrame {
            sequence: self.sequence,
            events: std::mem::take(&mut self.pending),
            timestamp: Local::now(),
        };

        match self.sender.try_send(frame) {
            Ok(()) => {
                self.sequence += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(SinkError::Full("input frame channel".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SinkError::Closed("input frame receiver dropped".to_string()))
            }
        }
    }
}

/// Logs transitions through tracing
#[derive(Debug, Default)]
pub struct LogSink {
    frames: u64,
}

impl InputSink for LogSink {
    fn report(&mut self, button: ButtonId, pressed: bool) -> Result<(), SinkError> {
        info!(
            "Button {} {}",
            button,
            if pressed { "pressed" } else { "released" }
        );
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.frames += 1;
        debug!("Frame {} synced", self.frames);
        Ok(())
    }
}

/// One call recorded by [`RecordingSink`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkRecord {
    Report(ButtonId, bool),
    Sync,
}

/// In-memory sink. Clones share the same record list, so one clone can be
/// handed to a decoder thread while another is inspected.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded calls split into frames, each frame being the reports
    /// before one sync
    pub fn frames(&self) -> Vec<Vec<TransitionEvent>> {
        let mut frames = Vec::new();
        let mut current = Vec::new();
        for record in self.records() {
            match record {
                SinkRecord::Report(button, pressed) => {
                    current.push(TransitionEvent { button, pressed })
                }
                SinkRecord::Sync => frames.push(std::mem::take(&mut current)),
            }
        }
        frames
    }

    pub fn sync_count(&self) -> usize {
        self.records()
            .iter()
            .filter(|r| matches!(r, SinkRecord::Sync))
            .count()
    }

    fn push(&self, record: SinkRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

impl InputSink for RecordingSink {
    fn report(&mut self, button: ButtonId, pressed: bool) -> Result<(), SinkError> {
        self.push(SinkRecord::Report(button, pressed));
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.push(SinkRecord::Sync);
        Ok(())
    }
}
