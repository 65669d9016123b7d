//! Edge-triggered serial frame acquisition
//!
//! The interrupt handler does as little as possible: it queues the edge's
//! timestamp for the frame thread. The frame thread samples one frame with
//! [`AsyncFrameReader::read_frame_from`], every sample due at a fixed offset
//! from that timestamp, and publishes it. An edge stamped before the end of
//! the last frame belongs to that frame (a data transition, or one left in
//! the queue while the frame was sampled) and is only counted.
//!
//! ```text
//! DATA edge ─► handler ─(queue full?)─► ignored
//!                 │
//!                 └─► timestamp ─► frame thread ─(before last frame end?)─► ignored
//!                                      │
//!                                      └─► sample from edge ─► StateDiffer ─► sink
//! ```

use super::{AcquisitionError, AcquisitionStats, StatsSnapshot};
use crate::decoder::async_reader::{
    AbandonReason, AsyncFrameReader, FrameOutcome, SerialFrameConfig,
};
use crate::decoder::button::ButtonMap;
use crate::decoder::differ::StateDiffer;
use crate::gpio::GpioBus;
use crate::sink::InputSink;
use crate::gpio::EdgeEvent;
use chrono::Local;
use embedded_hal::delay::DelayNs;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const THREAD_NAME: &str = "gpiojoy-frames";

/// How often the idle frame thread checks for cancellation
const WAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Edges buffered between the handler and the frame thread
const EDGE_QUEUE: usize = 8;

#[derive(Clone, Debug)]
pub struct EdgeSettings {
    pub stats_interval: Duration,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(30),
        }
    }
}

pub struct EdgeAcquisitionHandle {
    cancel: CancellationToken,
    stats: Arc<AcquisitionStats>,
    thread: thread::JoinHandle<()>,
}

impl EdgeAcquisitionHandle {
    /// Claims DATA (and SYNC), registers the start-edge interrupt and starts
    /// the frame thread.
    ///
    /// Any claim or registration failure is returned as
    /// [`AcquisitionError::ResourceUnavailable`] before a thread exists.
    pub fn spawn<B, D>(
        mut bus: B,
        delay: D,
        config: SerialFrameConfig,
        map: ButtonMap,
        sink: Box<dyn InputSink + Send>,
        settings: EdgeSettings,
        cancel: CancellationToken,
    ) -> Result<Self, AcquisitionError>
    where
        B: GpioBus + Send + 'static,
        D: DelayNs + Send + 'static,
    {
        map.check_width(config.width)?;
        info!(
            "Starting serial acquisition on {} ({:?} edge, {} baud, {} bits, {:?})",
            config.data, config.start_edge, config.bit_rate, config.width, config.bit_order
        );

        let mut reader = AsyncFrameReader::new(config);
        reader.configure(&mut bus)?;

        let stats = Arc::new(AcquisitionStats::new());
        let (edge_tx, edge_rx) = mpsc::sync_channel::<Instant>(EDGE_QUEUE);

        let handler_stats = Arc::clone(&stats);
        bus.register_edge_interrupt(
            config.data,
            config.start_edge,
            Box::new(move |event: EdgeEvent| {
                if edge_tx.try_send(event.timestamp).is_err() {
                    handler_stats.record_ignored_edge();
                }
            }),
        )?;

        let worker = FrameWorker {
            bus,
            delay,
            reader,
            differ: StateDiffer::new(map),
            sink,
            stats: Arc::clone(&stats),
            edges: edge_rx,
            last_frame_end: None,
            cancel: cancel.clone(),
            stats_interval: settings.stats_interval,
        };

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|e| AcquisitionError::Spawn(e.to_string()))?;

        Ok(Self {
            cancel,
            stats,
            thread,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Cancels and waits for the frame thread. A frame in flight is finished
    /// first.
    pub fn stop(self) -> Result<StatsSnapshot, AcquisitionError> {
        self.cancel.cancel();
        self.join()
    }

    /// Blocks until the frame thread exits
    pub fn join(self) -> Result<StatsSnapshot, AcquisitionError> {
        if self.thread.join().is_err() {
            error!("Frame thread panicked");
            return Err(AcquisitionError::WorkerPanicked);
        }
        Ok(self.stats.snapshot())
    }
}

struct FrameWorker<B, D> {
    bus: B,
    delay: D,
    reader: AsyncFrameReader,
    differ: StateDiffer,
    sink: Box<dyn InputSink + Send>,
    stats: Arc<AcquisitionStats>,
    edges: mpsc::Receiver<Instant>,
    last_frame_end: Option<Instant>,
    cancel: CancellationToken,
    stats_interval: Duration,
}

impl<B: GpioBus, D: DelayNs> FrameWorker<B, D> {
    fn run(mut self) {
        info!("Frame thread started");
        let stats_interval = chrono::Duration::from_std(self.stats_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let started = Local::now();
        let mut last_stats_time = started;

        while !self.cancel.is_cancelled() {
            match self.edges.recv_timeout(WAKE_TIMEOUT) {
                Ok(edge) => self.handle_edge(edge),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Edge interrupt handler dropped, stopping frame thread");
                    break;
                }
            }

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                self.stats.log_summary("serial", started);
                last_stats_time = now;
            }
        }

        self.stats.log_summary("serial", started);
        info!("Frame thread stopped");
    }

    fn handle_edge(&mut self, edge: Instant) {
        if self.last_frame_end.is_some_and(|end| edge < end) {
            trace!("Edge inside the previous frame ignored");
            self.stats.record_ignored_edge();
            return;
        }

        let config = *self.reader.config();
        self.reader.on_start_edge();
        let outcome = self
            .reader
            .read_frame_from(&mut self.bus, &mut self.delay, edge);

        self.last_frame_end = Some(match outcome {
            Some(FrameOutcome::Abandoned(AbandonReason::FalseStart)) => {
                edge + config.bit_period() / 2
            }
            _ => edge + config.frame_duration(),
        });

        match outcome {
            Some(FrameOutcome::Complete(frame)) => {
                self.stats.record_frame(frame.faults);
                if frame.bad_stop_bit {
                    debug!("Publishing frame with bad stop bit");
                }
                match self.differ.publish(frame.word, self.sink.as_mut()) {
                    Ok(report) => self.stats.record_published(report.events),
                    Err(e) => {
                        warn!("Sink rejected frame: {}", e);
                        self.stats.record_sink_error();
                    }
                }
            }
            Some(FrameOutcome::Abandoned(AbandonReason::FalseStart)) => {
                self.stats.record_false_start();
            }
            Some(FrameOutcome::Abandoned(AbandonReason::Late)) => {
                debug!("Frame thread reached the edge too late, frame dropped");
                self.stats.record_late_frame();
            }
            Some(FrameOutcome::Abandoned(reason)) => {
                let faults = match reason {
                    AbandonReason::LineFault { faults } => faults,
                    _ => 0,
                };
                self.stats.record_frame(faults);
                self.stats.record_discarded();
                debug!("Frame abandoned: {:?}", reason);
            }
            None => {
                // No frame was started
                self.reader.abandon();
            }
        }
    }
}
