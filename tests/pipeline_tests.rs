use gpiojoy::acquisition::{
    AcquisitionError, EdgeAcquisitionHandle, EdgeSettings, PollerHandle, PollerSettings,
};
use gpiojoy::decoder::{
    ButtonId, ButtonMap, ButtonWord, Polarity, SerialFrameConfig, ShiftLines, SyncShiftReader,
    TransitionEvent,
};
use gpiojoy::gpio::sim::{ShiftRegisterPad, SimulatedBus};
use gpiojoy::gpio::{
    Direction, Edge, EdgeHandler, GpioBus, GpioError, Level, Line, SharedBus,
};
use gpiojoy::sink::{ChannelRegistrar, DeviceIdentity, DeviceRegistrar, RecordingSink};
use gpiojoy::timing::{RecordedDelay, SpinDelay};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const LINES: ShiftLines = ShiftLines {
    latch: Line(5),
    clock: Line(6),
    data: Line(13),
};
const DATA: Line = Line(17);
const SYNC: Line = Line(27);

fn poller_settings() -> PollerSettings {
    PollerSettings {
        interval: Duration::from_millis(1),
        stats_interval: Duration::from_secs(30),
    }
}

fn non_empty_frames(recorder: &RecordingSink) -> Vec<Vec<TransitionEvent>> {
    recorder
        .frames()
        .into_iter()
        .filter(|f| !f.is_empty())
        .collect()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

fn wait_for_blocking(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[tokio::test]
async fn test_poller_reports_pad_transitions() {
    let pad = SharedBus::new(ShiftRegisterPad::new(
        LINES.latch,
        LINES.clock,
        LINES.data,
        11,
    ));
    let recorder = RecordingSink::new();
    let cancel = CancellationToken::new();

    pad.with(|p| p.set_buttons(ButtonWord::from_bits(0b1_0001)));

    let handle = PollerHandle::spawn(
        pad.clone(),
        SpinDelay,
        SyncShiftReader::new(LINES, 11, Polarity::ActiveLow),
        ButtonMap::nes_extended(),
        Box::new(recorder.clone()),
        poller_settings(),
        cancel.clone(),
    )
    .unwrap();

    wait_for(|| !non_empty_frames(&recorder).is_empty()).await;
    assert_eq!(
        non_empty_frames(&recorder)[0],
        vec![
            TransitionEvent::new(ButtonId::A, true),
            TransitionEvent::new(ButtonId::Up, true),
        ]
    );

    pad.with(|p| p.set_buttons(ButtonWord::from_bits(0b1_0010)));
    wait_for(|| non_empty_frames(&recorder).len() >= 2).await;
    assert_eq!(
        non_empty_frames(&recorder)[1],
        vec![
            TransitionEvent::new(ButtonId::A, false),
            TransitionEvent::new(ButtonId::B, true),
        ]
    );

    let stats = handle.stop().await.unwrap();
    assert!(stats.frames_read >= 2);
    assert_eq!(stats.frames_published, stats.frames_read);
    assert_eq!(stats.transitions, 4);
    assert_eq!(recorder.sync_count() as u64, stats.frames_published);
}

#[tokio::test]
async fn test_poller_setup_fails_on_unavailable_line() {
    let bus = SimulatedBus::new().with_unavailable(LINES.clock);
    let result = PollerHandle::spawn(
        bus,
        RecordedDelay::new(),
        SyncShiftReader::new(LINES, 11, Polarity::ActiveLow),
        ButtonMap::nes_extended(),
        Box::new(RecordingSink::new()),
        poller_settings(),
        CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(AcquisitionError::ResourceUnavailable(GpioError::Unavailable(line, _))) if line == LINES.clock
    ));
}

#[tokio::test]
async fn test_poller_publishes_through_registered_device() {
    let (mut registrar, mut frames) = ChannelRegistrar::new(64);
    let map = ButtonMap::nes_extended();
    let sink = registrar
        .register(&DeviceIdentity::default(), &map.buttons())
        .unwrap();

    let pad = SharedBus::new(ShiftRegisterPad::new(
        LINES.latch,
        LINES.clock,
        LINES.data,
        11,
    ));
    pad.with(|p| p.set_buttons(ButtonWord::EMPTY.with_pressed(3)));

    let handle = PollerHandle::spawn(
        pad,
        SpinDelay,
        SyncShiftReader::new(LINES, 11, Polarity::ActiveLow),
        map,
        sink,
        poller_settings(),
        CancellationToken::new(),
    )
    .unwrap();

    let first = frames.recv().await.unwrap();
    assert_eq!(first.sequence, 0);
    assert_eq!(first.events, vec![TransitionEvent::new(ButtonId::Start, true)]);

    handle.stop().await.unwrap();
}

/// Stamps an edge a little ahead so the frame thread's wake-up latency
/// never makes it late
fn fire_soon(bus: &SharedBus<SimulatedBus>) -> Instant {
    let edge = Instant::now() + Duration::from_millis(20);
    assert!(bus.with(|b| b.fire_edge_at(DATA, edge)));
    edge
}

/// Shift-register pad that remembers which threads read from it
struct ThreadTrackingPad {
    pad: ShiftRegisterPad,
    readers: Arc<Mutex<HashSet<ThreadId>>>,
}

impl GpioBus for ThreadTrackingPad {
    fn configure_direction(&mut self, line: Line, direction: Direction) -> Result<(), GpioError> {
        self.pad.configure_direction(line, direction)
    }

    fn read(&mut self, line: Line) -> Result<Level, GpioError> {
        self.readers.lock().unwrap().insert(thread::current().id());
        self.pad.read(line)
    }

    fn write(&mut self, line: Line, level: Level) -> Result<(), GpioError> {
        self.pad.write(line, level)
    }

    fn register_edge_interrupt(
        &mut self,
        line: Line,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<(), GpioError> {
        self.pad.register_edge_interrupt(line, edge, handler)
    }
}

#[tokio::test]
async fn test_poller_reads_off_the_runtime_thread() {
    let readers = Arc::new(Mutex::new(HashSet::new()));
    let pad = ThreadTrackingPad {
        pad: ShiftRegisterPad::new(LINES.latch, LINES.clock, LINES.data, 11),
        readers: Arc::clone(&readers),
    };
    let recorder = RecordingSink::new();

    let handle = PollerHandle::spawn(
        pad,
        SpinDelay,
        SyncShiftReader::new(LINES, 11, Polarity::ActiveLow),
        ButtonMap::nes_extended(),
        Box::new(recorder.clone()),
        poller_settings(),
        CancellationToken::new(),
    )
    .unwrap();

    wait_for(|| recorder.sync_count() >= 3).await;
    handle.stop().await.unwrap();

    // The test runtime is single threaded: any read on this thread would
    // have blocked it
    let readers = readers.lock().unwrap();
    assert!(!readers.is_empty());
    assert!(!readers.contains(&thread::current().id()));
}

fn serial_config() -> SerialFrameConfig {
    let mut config = SerialFrameConfig::new(DATA);
    config.sync = Some(SYNC);
    config
}

#[test]
fn test_edge_context_publishes_frames() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();
    let config = serial_config();

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        RecordedDelay::new(),
        config,
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();
    assert!(bus.with(|b| b.has_interrupt(DATA)));

    let frames = [
        ButtonWord::from_bits(0b1_0001),
        ButtonWord::from_bits(0b1_0001),
        ButtonWord::from_bits(0b1_0010),
    ];
    // One frame every 5 ms on the wire
    let first = Instant::now() + Duration::from_millis(20);
    for (i, word) in frames.iter().enumerate() {
        let edge = first + Duration::from_millis(5) * i as u32;
        bus.with(|b| {
            b.script_serial_frame(&config, *word);
            assert!(b.fire_edge_at(DATA, edge));
        });
        wait_for_blocking(|| handle.stats().frames_published == i as u64 + 1);
    }

    assert_eq!(
        recorder.frames(),
        vec![
            vec![
                TransitionEvent::new(ButtonId::A, true),
                TransitionEvent::new(ButtonId::Up, true),
            ],
            vec![],
            vec![
                TransitionEvent::new(ButtonId::A, false),
                TransitionEvent::new(ButtonId::B, true),
            ],
        ]
    );
    assert_eq!(
        bus.with(|b| b.writes_to(SYNC)),
        vec![Level::Low, Level::High, Level::Low, Level::High]
    );

    let stats = handle.stop().unwrap();
    assert_eq!(stats.frames_read, 3);
    assert_eq!(stats.ignored_edges, 0);
    assert_eq!(stats.late_frames, 0);
}

#[test]
fn test_edge_while_sampling_is_counted_not_restarted() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();
    let config = serial_config();

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        SpinDelay,
        config,
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();

    let word = ButtonWord::from_bits(0b11);
    bus.with(|b| b.script_serial_frame(&config, word));
    let edge = fire_soon(&bus);
    // A data transition 300 µs into the first frame
    bus.with(|b| b.fire_edge_at(DATA, edge + Duration::from_micros(300)));

    wait_for_blocking(|| handle.stats().frames_published == 1);
    wait_for_blocking(|| handle.stats().ignored_edges == 1);
    let stats = handle.stop().unwrap();

    assert_eq!(stats.ignored_edges, 1);
    assert_eq!(stats.frames_read, 1);
    assert_eq!(
        recorder.frames(),
        vec![vec![
            TransitionEvent::new(ButtonId::A, true),
            TransitionEvent::new(ButtonId::B, true),
        ]]
    );
}

#[test]
fn test_edge_setup_fails_on_unavailable_data_line() {
    let result = EdgeAcquisitionHandle::spawn(
        SimulatedBus::new().with_unavailable(DATA),
        RecordedDelay::new(),
        serial_config(),
        ButtonMap::serial_sixteen(),
        Box::new(RecordingSink::new()),
        EdgeSettings::default(),
        CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(AcquisitionError::ResourceUnavailable(_))
    ));
}

#[test]
fn test_discarded_frames_are_not_published() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();
    let mut config = serial_config();
    config.anomaly_policy = gpiojoy::decoder::AnomalyPolicy::Discard;

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        RecordedDelay::new(),
        config,
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();

    bus.with(|b| {
        b.script_bits(DATA, &[0, 1, 1]);
        b.script_fault(DATA);
        b.script_bits(DATA, &[0; 13]);
    });
    fire_soon(&bus);
    wait_for_blocking(|| handle.stats().discarded_frames == 1);

    let stats = handle.stop().unwrap();
    assert_eq!(stats.frames_published, 0);
    assert_eq!(stats.line_faults, 1);
    assert!(recorder.records().is_empty());
    assert_eq!(bus.with(|b| b.writes_to(SYNC)), vec![Level::Low]);
}

#[test]
fn test_stale_edge_after_frame_is_dropped() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();
    let config = serial_config();

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        RecordedDelay::new(),
        config,
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();

    bus.with(|b| b.script_serial_frame(&config, ButtonWord::from_bits(0b1)));
    let edge = fire_soon(&bus);
    wait_for_blocking(|| handle.stats().frames_published == 1);

    // Delivered after the frame was published but stamped inside it
    bus.with(|b| b.fire_edge_at(DATA, edge + config.frame_duration() / 2));
    wait_for_blocking(|| handle.stats().ignored_edges == 1);

    let stats = handle.stop().unwrap();
    assert_eq!(stats.frames_read, 1);
    assert_eq!(stats.false_starts, 0);
    assert_eq!(bus.with(|b| b.total_reads()), 17);
    assert_eq!(recorder.frames().len(), 1);
}

#[test]
fn test_late_edge_is_dropped_unsampled() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();
    let config = serial_config();

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        RecordedDelay::new(),
        config,
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();

    bus.with(|b| {
        b.script_serial_frame(&config, ButtonWord::from_bits(0b1));
        b.fire_edge_at(DATA, Instant::now() - Duration::from_millis(50));
    });
    wait_for_blocking(|| handle.stats().late_frames == 1);

    let stats = handle.stop().unwrap();
    assert_eq!(stats.frames_read, 0);
    assert!(recorder.records().is_empty());
    assert_eq!(bus.with(|b| b.total_reads()), 0);
}

#[test]
fn test_glitch_on_idle_line_publishes_nothing() {
    let bus = SharedBus::new(SimulatedBus::new());
    let recorder = RecordingSink::new();

    let handle = EdgeAcquisitionHandle::spawn(
        bus.clone(),
        RecordedDelay::new(),
        serial_config(),
        ButtonMap::serial_sixteen(),
        Box::new(recorder.clone()),
        EdgeSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();

    // Nothing scripted: DATA is back at idle for the start-cell check
    fire_soon(&bus);
    wait_for_blocking(|| handle.stats().false_starts == 1);

    let stats = handle.stop().unwrap();
    assert_eq!(stats.frames_read, 0);
    assert!(recorder.records().is_empty());
    assert_eq!(bus.with(|b| b.writes_to(SYNC)), vec![Level::Low]);
}
