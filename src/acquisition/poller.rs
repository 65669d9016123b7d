//! Periodic shift-register polling
//!
//! One cycle per interval tick, modelled as a typestate machine:
//!
//! ```text
//! Waiting ──begin──► Reading ──read──► Publishing(ShiftFrame) ──publish──► Waiting
//! ```
//!
//! The interval skips missed ticks, so a slow cycle delays the next read
//! instead of queueing reads back to back. Reads never overlap. A read spins
//! through its settle times, so each cycle runs on tokio's blocking pool
//! rather than on a runtime worker.

use super::{AcquisitionError, AcquisitionStats, StatsSnapshot};
use crate::decoder::button::ButtonMap;
use crate::decoder::differ::StateDiffer;
use crate::decoder::sync_reader::{ShiftFrame, SyncShiftReader};
use crate::gpio::GpioBus;
use crate::sink::InputSink;
use chrono::Local;
use embedded_hal::delay::DelayNs;
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct PollerSettings {
    pub interval: Duration,
    pub stats_interval: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2),
            stats_interval: Duration::from_secs(30),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum PollState {
    Waiting,
    Reading,
    Publishing(ShiftFrame),
}

#[machine]
#[derive(Debug)]
pub struct ShiftPoller<S: PollState> {
    reader: SyncShiftReader,
    differ: StateDiffer,
    stats: Arc<AcquisitionStats>,
}

impl<S: PollState> ShiftPoller<S> {
    pub fn reader(&self) -> &SyncShiftReader {
        &self.reader
    }

    pub fn differ(&self) -> &StateDiffer {
        &self.differ
    }

    pub fn stats(&self) -> &Arc<AcquisitionStats> {
        &self.stats
    }
}

impl ShiftPoller<Waiting> {
    pub fn create(
        reader: SyncShiftReader,
        map: ButtonMap,
        stats: Arc<AcquisitionStats>,
    ) -> Result<Self, AcquisitionError> {
        map.check_width(reader.width())?;
        debug!(
            "Creating shift poller: {}-bit frames, {} mapped buttons",
            reader.width(),
            map.len()
        );
        Ok(Self::new(reader, StateDiffer::new(map), stats))
    }

    pub fn begin(self) -> ShiftPoller<Reading> {
        self.transition()
    }

    /// Runs one full cycle and comes back to `Waiting`
    pub fn poll_once<B, D, S>(self, bus: &mut B, delay: &mut D, sink: &mut S) -> Self
    where
        B: GpioBus + ?Sized,
        D: DelayNs + ?Sized,
        S: InputSink + ?Sized,
    {
        self.begin().read(bus, delay).publish(sink)
    }
}

impl ShiftPoller<Reading> {
    pub fn read<B, D>(self, bus: &mut B, delay: &mut D) -> ShiftPoller<Publishing>
    where
        B: GpioBus + ?Sized,
        D: DelayNs + ?Sized,
    {
        let frame = self.reader.read_frame(bus, delay);
        self.stats.record_frame(frame.faults);
        if frame.faults > 0 {
            debug!("Frame read with {} faulted bits", frame.faults);
        }
        self.transition_with(frame)
    }
}

impl ShiftPoller<Publishing> {
    pub fn frame(&self) -> Option<&ShiftFrame> {
        self.get_state_data()
    }

    /// Hands the frame to the differ. A rejected frame is dropped; the
    /// differ keeps its previous word so the transitions are retried with
    /// the next frame.
    pub fn publish<S: InputSink + ?Sized>(mut self, sink: &mut S) -> ShiftPoller<Waiting> {
        let frame = self.get_state_data().copied().unwrap_or_default();

        match self.differ.publish(frame.word, sink) {
            Ok(report) => self.stats.record_published(report.events),
            Err(e) => {
                warn!("Sink rejected frame: {}", e);
                self.stats.record_sink_error();
            }
        }
        self.transition()
    }
}

/// Running poller task
pub struct PollerHandle {
    cancel: CancellationToken,
    stats: Arc<AcquisitionStats>,
    task: JoinHandle<Result<(), AcquisitionError>>,
}

impl PollerHandle {
    /// Claims the lines and spawns the polling task on the current runtime.
    ///
    /// Fails with [`AcquisitionError::ResourceUnavailable`] when a line
    /// cannot be claimed; nothing is spawned in that case.
    pub fn spawn<B, D>(
        mut bus: B,
        delay: D,
        reader: SyncShiftReader,
        map: ButtonMap,
        sink: Box<dyn InputSink + Send>,
        settings: PollerSettings,
        cancel: CancellationToken,
    ) -> Result<Self, AcquisitionError>
    where
        B: GpioBus + Send + 'static,
        D: DelayNs + Send + 'static,
    {
        info!(
            "Starting shift-register poller on {}/{}/{} every {:?}",
            reader.lines().latch,
            reader.lines().clock,
            reader.lines().data,
            settings.interval
        );

        reader.configure(&mut bus)?;
        let stats = Arc::new(AcquisitionStats::new());
        let poller = ShiftPoller::create(reader, map, Arc::clone(&stats))?;
        let cycle = PollCycle {
            poller,
            bus,
            delay,
            sink,
        };

        let task = tokio::spawn(run_poll_loop(
            cycle,
            Arc::clone(&stats),
            settings,
            cancel.clone(),
        ));

        Ok(Self {
            cancel,
            stats,
            task,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the task and waits for the cycle in flight to finish
    pub async fn stop(self) -> Result<StatsSnapshot, AcquisitionError> {
        self.cancel.cancel();
        self.join().await
    }

    pub async fn join(self) -> Result<StatsSnapshot, AcquisitionError> {
        match self.task.await {
            Ok(Ok(())) => Ok(self.stats.snapshot()),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                error!("Poller task failed: {}", e);
                Err(AcquisitionError::WorkerPanicked)
            }
        }
    }
}

/// Everything one cycle needs, moved onto the blocking pool and back
struct PollCycle<B, D> {
    poller: ShiftPoller<Waiting>,
    bus: B,
    delay: D,
    sink: Box<dyn InputSink + Send>,
}

impl<B: GpioBus, D: DelayNs> PollCycle<B, D> {
    fn run(self) -> Self {
        let Self {
            poller,
            mut bus,
            mut delay,
            mut sink,
        } = self;
        let poller = poller.poll_once(&mut bus, &mut delay, sink.as_mut());
        Self {
            poller,
            bus,
            delay,
            sink,
        }
    }
}

async fn run_poll_loop<B, D>(
    mut cycle: PollCycle<B, D>,
    stats: Arc<AcquisitionStats>,
    settings: PollerSettings,
    cancel: CancellationToken,
) -> Result<(), AcquisitionError>
where
    B: GpioBus + Send + 'static,
    D: DelayNs + Send + 'static,
{
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let stats_interval = chrono::Duration::from_std(settings.stats_interval)
        .unwrap_or_else(|_| chrono::Duration::seconds(30));
    let started = Local::now();
    let mut last_stats_time = started;

    info!("Entering poll loop");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Poller cancelled");
                break;
            }
            _ = ticker.tick() => {
                // A cycle is never interrupted; cancellation is only seen
                // between frames.
                cycle = match task::spawn_blocking(move || cycle.run()).await {
                    Ok(cycle) => cycle,
                    Err(e) => {
                        error!("Poll cycle failed: {}", e);
                        stats.log_summary("poller", started);
                        return Err(AcquisitionError::WorkerPanicked);
                    }
                };
            }
        }

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            stats.log_summary("poller", started);
            last_stats_time = now;
        }
    }
    stats.log_summary("poller", started);
    Ok(())
}
