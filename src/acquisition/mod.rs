//! Execution contexts that drive the decoder
//!
//! Two ways to get frames off the wire, never combined on one decoder:
//!
//! - [`poller`]: a tokio task ticks once per interval and runs each
//!   shift-register read on the blocking pool
//! - [`edge`]: a start-edge interrupt hands its timestamp to a dedicated
//!   thread that samples one self-clocked frame
//!
//! Each context owns its bus, reader, [`crate::decoder::StateDiffer`] and
//! sink outright. The only state shared with the outside is the
//! [`AcquisitionStats`] counter block and the cancellation token.

pub mod edge;
pub mod poller;

use crate::decoder::button::ButtonMapError;
use crate::gpio::GpioError;
use crate::sink::SinkError;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

pub use edge::{EdgeAcquisitionHandle, EdgeSettings};
pub use poller::{PollerHandle, PollerSettings, ShiftPoller};

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// A line or the edge interrupt could not be claimed. Not retried.
    #[error("GPIO resource unavailable: {0}")]
    ResourceUnavailable(#[from] GpioError),

    #[error("Button map does not fit the frame: {0}")]
    InvalidMap(#[from] ButtonMapError),

    #[error("Input device registration failed: {0}")]
    Registration(#[from] SinkError),

    #[error("Failed to start acquisition worker: {0}")]
    Spawn(String),

    #[error("Acquisition worker terminated abnormally")]
    WorkerPanicked,
}

/// Counters updated by a running context
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    frames_read: AtomicU64,
    frames_published: AtomicU64,
    transitions: AtomicU64,
    line_faults: AtomicU64,
    discarded_frames: AtomicU64,
    sink_errors: AtomicU64,
    ignored_edges: AtomicU64,
    false_starts: AtomicU64,
    late_frames: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub frames_published: u64,
    pub transitions: u64,
    pub line_faults: u64,
    pub discarded_frames: u64,
    pub sink_errors: u64,
    /// Edges that arrived mid-frame, stale or with the queue full
    pub ignored_edges: u64,
    /// Edges whose start cell already read idle
    pub false_starts: u64,
    /// Frames dropped because sampling started too long after the edge
    pub late_frames: u64,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, faults: u8) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.line_faults
            .fetch_add(u64::from(faults), Ordering::Relaxed);
    }

    pub fn record_published(&self, transitions: usize) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.transitions
            .fetch_add(transitions as u64, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored_edge(&self) {
        self.ignored_edges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_false_start(&self) {
        self.false_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_frame(&self) {
        self.late_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            line_faults: self.line_faults.load(Ordering::Relaxed),
            discarded_frames: self.discarded_frames.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            ignored_edges: self.ignored_edges.load(Ordering::Relaxed),
            false_starts: self.false_starts.load(Ordering::Relaxed),
            late_frames: self.late_frames.load(Ordering::Relaxed),
        }
    }

    /// Logs the counters with the frame rate since `started`
    pub fn log_summary(&self, label: &str, started: DateTime<Local>) {
        let snapshot = self.snapshot();
        let elapsed = Local::now() - started;
        let secs = elapsed.num_milliseconds().max(1) as f64 / 1000.0;

        info!(
            "[{}] {} frames ({:.1}/s), {} published, {} transitions, {} line faults, {} discarded, {} sink errors, {} ignored edges, {} false starts, {} late (up {}s)",
            label,
            snapshot.frames_read,
            snapshot.frames_read as f64 / secs,
            snapshot.frames_published,
            snapshot.transitions,
            snapshot.line_faults,
            snapshot.discarded_frames,
            snapshot.sink_errors,
            snapshot.ignored_edges,
            snapshot.false_starts,
            snapshot.late_frames,
            elapsed.num_seconds()
        );
    }
}
