use pretty_assertions::assert_eq;
use pulselaser_core::config::EngineConfig;
use pulselaser_core::protocol::ProtocolError;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.port_name, None);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.idle_delay(), Duration::from_millis(20));
    assert_eq!(config.history_capacity, 1000);
    assert_eq!(config.read_burst_limit, 10);
    assert_eq!(config.energy_sample_capacity, 10_000);
    assert_eq!(config.max_consecutive_io_failures, 5);
    assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
    assert_eq!(config.probe.settle_delay_ms, 200);
    assert_eq!(config.probe.reply_wait_ms, 300);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{
            "port_name": "/dev/ttyUSB3",
            "poll_interval_ms": 250,
            "history_capacity": 64
        }}"#
    )
    .unwrap();

    let config = EngineConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.port_name.as_deref(), Some("/dev/ttyUSB3"));
    assert_eq!(config.poll_interval_ms, 250);
    assert_eq!(config.history_capacity, 64);
    assert_eq!(config.idle_delay_ms, 20);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = EngineConfig::from_json_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(ProtocolError::InvalidConfig(_))));
}

#[test]
fn test_invalid_json() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(
        EngineConfig::from_json_file(file.path()),
        Err(ProtocolError::InvalidConfig(_))
    ));
}

#[test]
fn test_zero_burst_limit_rejected() {
    let config = EngineConfig {
        read_burst_limit: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ProtocolError::InvalidConfig(msg)) if msg.contains("read_burst_limit")
    ));
}

#[test]
fn test_round_trips_through_json() {
    let config = EngineConfig {
        port_name: Some("COM5".to_string()),
        ..EngineConfig::default()
    };
    let text = serde_json::to_string(&config).unwrap();
    assert_eq!(EngineConfig::from_json_str(&text).unwrap(), config);
}
