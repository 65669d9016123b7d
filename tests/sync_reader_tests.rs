use gpiojoy::decoder::{ButtonId, ButtonMap, ButtonWord, Polarity, ShiftLines, SyncShiftReader};
use gpiojoy::gpio::sim::{ShiftRegisterPad, SimulatedBus};
use gpiojoy::gpio::{Level, Line};
use gpiojoy::timing::RecordedDelay;

const LATCH: Line = Line(5);
const CLOCK: Line = Line(6);
const DATA: Line = Line(13);

fn reader(width: u8) -> SyncShiftReader {
    SyncShiftReader::new(
        ShiftLines {
            latch: LATCH,
            clock: CLOCK,
            data: DATA,
        },
        width,
        Polarity::ActiveLow,
    )
}

#[test]
fn test_low_samples_are_pressed() {
    let mut bus = SimulatedBus::new();
    bus.script_bits(DATA, &[0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0]);

    let frame = reader(11).read_frame(&mut bus, &mut RecordedDelay::new());

    for bit in [0, 2, 3, 5, 6, 7, 8, 9, 10] {
        assert!(frame.word.is_pressed(bit), "bit {} should be pressed", bit);
    }
    assert!(!frame.word.is_pressed(1));
    assert!(!frame.word.is_pressed(4));
    assert_eq!(frame.faults, 0);
    assert_eq!(bus.pending_reads(DATA), 0);
}

#[test]
fn test_faulted_bit_reads_released() {
    for k in [0u8, 5, 10] {
        let mut bus = SimulatedBus::new();
        let before = vec![0u8; k as usize];
        let after = vec![0u8; (10 - k) as usize];
        bus.script_bits(DATA, &before);
        bus.script_fault(DATA);
        bus.script_bits(DATA, &after);

        let frame = reader(11).read_frame(&mut bus, &mut RecordedDelay::new());

        assert_eq!(frame.faults, 1);
        assert!(!frame.word.is_pressed(k));
        assert_eq!(frame.word.pressed_count(), 10);
    }
}

#[test]
fn test_frame_takes_fixed_time() {
    let mut delay = RecordedDelay::new();
    reader(11).read_frame(&mut SimulatedBus::new(), &mut delay);
    // 12 + 6 latch, then 12 per clocked bit
    assert_eq!(delay.total_us(), 18 + 11 * 12);
}

#[test]
fn test_reads_simulated_pad() {
    let mut pad = ShiftRegisterPad::new(LATCH, CLOCK, DATA, 11);
    let map = ButtonMap::nes_extended();
    let reader = reader(11);
    reader.configure(&mut pad).unwrap();

    let held = ButtonWord::EMPTY
        .with_pressed(map.bit_of(ButtonId::Start).unwrap())
        .with_pressed(map.bit_of(ButtonId::Push).unwrap());
    pad.set_buttons(held);

    let frame = reader.read_frame(&mut pad, &mut RecordedDelay::new());
    assert_eq!(frame.word, held);
    assert_eq!(pad.latch_pulses(), 1);

    pad.set_buttons(ButtonWord::EMPTY);
    let frame = reader.read_frame(&mut pad, &mut RecordedDelay::new());
    assert!(frame.word.is_empty());
    assert_eq!(pad.latch_pulses(), 2);
}

#[test]
fn test_ten_bit_frame_ignores_extra_bits() {
    let mut bus = SimulatedBus::new();
    bus.script_bits(DATA, &[0; 12]);

    let frame = reader(10).read_frame(&mut bus, &mut RecordedDelay::new());
    assert_eq!(frame.word.bits(), 0x03FF);
    assert_eq!(bus.pending_reads(DATA), 2);
    assert_eq!(bus.writes_to(LATCH), vec![Level::High, Level::Low]);
}

#[test]
fn test_unwritable_control_line_still_reads_full_frame() {
    for broken in [LATCH, CLOCK] {
        let mut bus = SimulatedBus::new().with_unavailable(broken);
        let mut delay = RecordedDelay::new();

        let frame = reader(11).read_frame(&mut bus, &mut delay);

        // DATA idles high: every bit released, none faulted
        assert!(frame.word.is_empty(), "{} broken", broken);
        assert_eq!(frame.faults, 0);
        assert_eq!(bus.total_reads(), 11);
        assert!(bus.writes_to(broken).is_empty());
        assert_eq!(delay.total_us(), 18 + 11 * 12);
    }
}
