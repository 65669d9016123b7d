use gpiojoy::config::{Backend, Config, ConfigError, Protocol, MIN_POLL_INTERVAL_MS};
use gpiojoy::decoder::{AnomalyPolicy, BitOrder, ButtonId, Polarity};
use gpiojoy::gpio::{Edge, Line};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_empty_file_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();

    assert_eq!(config.backend, Backend::Rppal);
    assert_eq!(config.decoder.protocol, Protocol::ShiftRegister);
    assert_eq!(config.device.name, "NES Joystick (GPIO)");

    let shift = &config.decoder.shift_register;
    assert_eq!(shift.width, 11);
    assert_eq!(shift.poll_interval(), Duration::from_millis(2));
    assert_eq!(shift.polarity, Polarity::ActiveLow);
    assert_eq!(shift.button_map().unwrap().len(), 11);
}

#[test]
fn test_serial_section() {
    let config = Config::from_toml_str(
        r#"
        backend = "simulated"

        [decoder]
        protocol = "serial"

        [decoder.serial]
        data = 22
        sync = 23
        bit_rate = 4800
        start_edge = "rising"
        bit_order = "msb_first"
        stop_bit = true
        anomaly_policy = "discard"
        "#,
    )
    .unwrap();

    assert_eq!(config.backend, Backend::Simulated);
    let frame = config.decoder.serial.frame_config();
    assert_eq!(frame.data, Line(22));
    assert_eq!(frame.sync, Some(Line(23)));
    assert_eq!(frame.width, 16);
    assert_eq!(frame.bit_period_us(), 208);
    assert_eq!(frame.start_edge, Edge::Rising);
    assert_eq!(frame.bit_order, BitOrder::MsbFirst);
    assert!(frame.stop_bit);
    assert_eq!(frame.anomaly_policy, AnomalyPolicy::Discard);
}

#[test]
fn test_custom_button_map() {
    let config = Config::from_toml_str(
        r#"
        [decoder.shift_register]
        width = 4
        buttons = [
            { bit = 3, button = "start" },
            { bit = 0, button = "a" },
        ]
        "#,
    )
    .unwrap();

    let map = config.decoder.shift_register.button_map().unwrap();
    assert_eq!(map.buttons(), vec![ButtonId::Start, ButtonId::A]);
}

#[test]
fn test_ten_bit_frame_gets_legacy_map() {
    let config = Config::from_toml_str("[decoder.shift_register]\nwidth = 10\n").unwrap();
    let map = config.decoder.shift_register.button_map().unwrap();
    assert_eq!(map.bit_of(ButtonId::A), Some(1));
    assert_eq!(map.bit_of(ButtonId::Left), Some(9));
}

#[test]
fn test_poll_interval_clamped_to_floor() {
    let config =
        Config::from_toml_str("[decoder.shift_register]\npoll_interval_ms = 0\n").unwrap();
    assert_eq!(
        config.decoder.shift_register.poll_interval_ms,
        MIN_POLL_INTERVAL_MS
    );
}

#[test]
fn test_rejects_invalid_settings() {
    let cases = [
        "[decoder.shift_register]\nwidth = 17\n",
        "[decoder.shift_register]\nwidth = 0\n",
        "[decoder.shift_register]\nwidth = 8\n",
        "[decoder.shift_register]\nclock = 5\n",
        "[decoder.shift_register]\nbuttons = [{ bit = 11, button = \"a\" }]\n",
        "[decoder.shift_register]\nbuttons = [{ bit = 1, button = \"a\" }, { bit = 1, button = \"b\" }]\n",
        "[decoder]\nprotocol = \"serial\"\n[decoder.serial]\nbit_rate = 0\n",
        "[decoder]\nprotocol = \"serial\"\n[decoder.serial]\ndata = 4\nsync = 4\n",
        "backend = \"gpiochip\"\n",
    ];

    for case in cases {
        assert!(Config::from_toml_str(case).is_err(), "accepted: {}", case);
    }

    assert!(matches!(
        Config::from_toml_str("[decoder.shift_register]\nclock = 5\n"),
        Err(ConfigError::LineConflict(Line(5)))
    ));
    assert!(matches!(
        Config::from_toml_str("[decoder.shift_register]\nwidth = 8\n"),
        Err(ConfigError::MissingButtonMap(8))
    ));
}

#[test]
fn test_inactive_protocol_is_not_validated() {
    let config =
        Config::from_toml_str("[decoder.serial]\nbit_rate = 0\n").unwrap();
    assert_eq!(config.decoder.protocol, Protocol::ShiftRegister);
}

#[test]
fn test_resolve_path_prefers_argument() {
    let path = Config::resolve_path(Some("/tmp/pad.toml".to_string()));
    assert_eq!(path, PathBuf::from("/tmp/pad.toml"));
}

#[tokio::test]
async fn test_default_file_written_and_loaded() {
    let dir = std::env::temp_dir().join(format!("gpiojoy-config-{}", std::process::id()));
    let path = dir.join("nested").join("config.toml");
    let _ = std::fs::remove_dir_all(&dir);

    Config::ensure_default(&path).await.unwrap();
    assert!(path.exists());

    let loaded = Config::load(&path).await.unwrap();
    assert_eq!(loaded.decoder.shift_register.width, 11);
    assert_eq!(loaded.runtime.stats_interval_secs, 30);

    // An existing file is left alone
    std::fs::write(&path, "backend = \"simulated\"\n").unwrap();
    Config::ensure_default(&path).await.unwrap();
    let loaded = Config::load(&path).await.unwrap();
    assert_eq!(loaded.backend, Backend::Simulated);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("gpiojoy-does-not-exist").join("config.toml");
    assert!(matches!(
        Config::load(&path).await,
        Err(ConfigError::Io { .. })
    ));
}
