use color_eyre::{eyre::eyre, Result};
use gpiojoy::acquisition::{
    EdgeAcquisitionHandle, EdgeSettings, PollerHandle, PollerSettings, StatsSnapshot,
};
use gpiojoy::config::{Backend, Config, Protocol};
use gpiojoy::decoder::{ButtonMap, ButtonWord, SerialFrameConfig};
use gpiojoy::gpio::rppal_bus::RppalBus;
use gpiojoy::gpio::sim::{test_pattern, ShiftRegisterPad, SimulatedBus};
use gpiojoy::gpio::{GpioBus, SharedBus};
use gpiojoy::sink::{ChannelRegistrar, DeviceRegistrar, InputFrame, InputSink};
use gpiojoy::timing::SpinDelay;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Period between frames sent by the simulated serial pad
const SIMULATED_FRAME_PERIOD: Duration = Duration::from_millis(20);

/// How far ahead of scripting a simulated frame its start edge is stamped
const SIMULATED_EDGE_LEAD: Duration = Duration::from_millis(1);

enum Acquisition {
    Poller(PollerHandle),
    Edge(EdgeAcquisitionHandle),
}

impl Acquisition {
    async fn stop(self) -> Result<StatsSnapshot> {
        let stats = match self {
            Acquisition::Poller(handle) => handle.stop().await?,
            Acquisition::Edge(handle) => tokio::task::spawn_blocking(move || handle.stop())
                .await
                .map_err(|e| eyre!("Failed to join frame thread: {}", e))??,
        };
        Ok(stats)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = Config::resolve_path(std::env::args().nth(1));
    Config::ensure_default(&path).await?;
    let config = Config::load(&path).await?;

    let cancel = CancellationToken::new();
    let (mut registrar, frames) = ChannelRegistrar::new(config.runtime.sink_capacity);
    let drain = tokio::spawn(drain_frames(frames));

    let acquisition = match config.decoder.protocol {
        Protocol::ShiftRegister => start_shift_register(&config, &mut registrar, &cancel)?,
        Protocol::Serial => start_serial(&config, &mut registrar, &cancel)?,
    };

    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c, shutting down");
    cancel.cancel();

    let stats = acquisition.stop().await?;
    info!("Final statistics: {:?}", stats);

    drop(registrar);
    drain
        .await
        .map_err(|e| eyre!("Frame drain task failed: {}", e))?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(log_filter())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Log filter from `RUST_LOG`, `info` when unset or unparsable
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn register(
    config: &Config,
    registrar: &mut ChannelRegistrar,
    map: &ButtonMap,
) -> Result<Box<dyn InputSink + Send>> {
    registrar
        .register(&config.device, &map.buttons())
        .map_err(|e| eyre!("Failed to register input device: {}", e))
}

fn start_shift_register(
    config: &Config,
    registrar: &mut ChannelRegistrar,
    cancel: &CancellationToken,
) -> Result<Acquisition> {
    let section = &config.decoder.shift_register;
    let map = section.button_map()?;
    let sink = register(config, registrar, &map)?;
    let reader = section.reader();
    let settings = PollerSettings {
        interval: section.poll_interval(),
        stats_interval: Duration::from_secs(config.runtime.stats_interval_secs),
    };

    let spawn = |bus: Box<dyn GpioBus + Send>| {
        PollerHandle::spawn(
            bus,
            SpinDelay,
            reader.clone(),
            map.clone(),
            sink,
            settings.clone(),
            cancel.clone(),
        )
    };

    let handle = match config.backend {
        Backend::Rppal => {
            let bus = RppalBus::new().map_err(|e| eyre!("Failed to open GPIO: {}", e))?;
            spawn(Box::new(bus))?
        }
        Backend::Simulated => {
            let lines = section.lines();
            let pad = SharedBus::new(ShiftRegisterPad::new(
                lines.latch,
                lines.clock,
                lines.data,
                section.width,
            ));
            let handle = spawn(Box::new(pad.clone()))?;
            tokio::spawn(drive_pad(
                pad,
                test_pattern(&map),
                Duration::from_millis(config.runtime.pattern_step_ms),
                cancel.clone(),
            ));
            handle
        }
    };
    Ok(Acquisition::Poller(handle))
}

fn start_serial(
    config: &Config,
    registrar: &mut ChannelRegistrar,
    cancel: &CancellationToken,
) -> Result<Acquisition> {
    let section = &config.decoder.serial;
    let map = section.button_map()?;
    let sink = register(config, registrar, &map)?;
    let frame_config = section.frame_config();
    let settings = EdgeSettings {
        stats_interval: Duration::from_secs(config.runtime.stats_interval_secs),
    };

    let handle = match config.backend {
        Backend::Rppal => {
            let bus = RppalBus::new().map_err(|e| eyre!("Failed to open GPIO: {}", e))?;
            EdgeAcquisitionHandle::spawn(
                bus,
                SpinDelay,
                frame_config,
                map,
                sink,
                settings,
                cancel.clone(),
            )?
        }
        Backend::Simulated => {
            let bus = SharedBus::new(SimulatedBus::new());
            let handle = EdgeAcquisitionHandle::spawn(
                bus.clone(),
                SpinDelay,
                frame_config,
                map.clone(),
                sink,
                settings,
                cancel.clone(),
            )?;
            tokio::spawn(drive_serial_pad(
                bus,
                frame_config,
                test_pattern(&map),
                Duration::from_millis(config.runtime.pattern_step_ms),
                cancel.clone(),
            ));
            handle
        }
    };
    Ok(Acquisition::Edge(handle))
}

/// Steps the simulated shift-register pad through `pattern`
async fn drive_pad(
    pad: SharedBus<ShiftRegisterPad>,
    pattern: Vec<ButtonWord>,
    step: Duration,
    cancel: CancellationToken,
) {
    info!("Simulated pad cycling {} pattern steps", pattern.len());
    let mut ticker = interval(step);
    for word in pattern.iter().cycle() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                pad.with(|p| p.set_buttons(*word));
                debug!("Simulated pad now holds {:#06x}", word.bits());
            }
        }
    }
}

/// Sends `pattern` as serial frames, one frame per period, each word held
/// for `step`
async fn drive_serial_pad(
    bus: SharedBus<SimulatedBus>,
    config: SerialFrameConfig,
    pattern: Vec<ButtonWord>,
    step: Duration,
    cancel: CancellationToken,
) {
    info!("Simulated serial pad cycling {} pattern steps", pattern.len());
    let frames_per_step =
        (step.as_millis() / SIMULATED_FRAME_PERIOD.as_millis()).max(1) as usize;
    let mut ticker = interval(SIMULATED_FRAME_PERIOD);
    let mut frame = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let word = pattern[(frame / frames_per_step) % pattern.len()];
                frame = frame.wrapping_add(1);
                bus.with(|b| {
                    // Only start a frame once the previous one was consumed
                    if b.pending_reads(config.data) == 0 {
                        b.script_serial_frame(&config, word);
                        b.fire_edge_at(config.data, Instant::now() + SIMULATED_EDGE_LEAD);
                    }
                });
            }
        }
    }
}

async fn drain_frames(mut frames: mpsc::Receiver<InputFrame>) {
    while let Some(frame) = frames.recv().await {
        if frame.events.is_empty() {
            trace!("Frame {} idle", frame.sequence);
            continue;
        }
        for event in &frame.events {
            info!(
                "{} frame {}: {} {}",
                frame.timestamp.format("%H:%M:%S.%3f"),
                frame.sequence,
                event.button,
                if event.pressed { "pressed" } else { "released" }
            );
        }
    }
    warn!("Input frame channel closed");
}
