use pretty_assertions::assert_eq;
use pulselaser_core::protocol::{
    checksum, compose, compose_command, decode_request, parse_frame, reply_frame, Command,
    ProtocolError, ReplyKind,
};
use pulselaser_core::status::{DeviceStatus, StatusModel};

const STAT7_FIXTURE: &[u8] = b"<@!UT05000200320A64000000008D\r";

fn embedded_checksum_matches(frame: &[u8]) -> bool {
    let text = std::str::from_utf8(frame).unwrap();
    let text = text.strip_suffix('\r').unwrap();
    let (content, fcs) = text.split_at(text.len() - 2);
    checksum(content.as_bytes()) == fcs
}

#[test]
fn test_every_command_carries_valid_checksum() {
    for command in Command::ALL {
        let parameters = match command.parameter() {
            Some(spec) => vec![Some(i64::from(spec.min)), Some(i64::from(spec.max))],
            None => vec![None],
        };
        for parameter in parameters {
            let frame = compose_command(command, parameter).unwrap();
            assert!(
                embedded_checksum_matches(&frame),
                "{} {:?} -> {:?}",
                command,
                parameter,
                String::from_utf8_lossy(&frame)
            );
            assert!(frame.starts_with(b"#!@"));
            assert!(frame.ends_with(b"\r"));
        }
    }
}

#[test]
fn test_checksum_of_full_wrap_is_zero_padded() {
    // '#' + '!' + '@' + '|' = 256
    assert_eq!(checksum(b"#!@|"), "00");
    assert_eq!(compose_command(Command::LaserOff, None).unwrap(), b"#!@XDC\r".to_vec());
}

#[test]
fn test_set_shutter_frame() {
    assert_eq!(compose("SetShutter", Some(1)).unwrap(), b"#!@z12F\r".to_vec());
}

#[test]
fn test_parameter_width_is_zero_padded() {
    assert_eq!(
        compose("SetRepetitionFrequency", Some(5)).unwrap(),
        format!("#!@m05{}\r", checksum(b"#!@m05")).into_bytes()
    );
    assert_eq!(
        compose("SetStepperPosition", Some(399)).unwrap(),
        format!("#!@O3018F{}\r", checksum(b"#!@O3018F")).into_bytes()
    );
}

#[test]
fn test_parameter_out_of_range() {
    match compose("SetRepetitionFrequency", Some(150)) {
        Err(ProtocolError::ParameterOutOfRange {
            command,
            value,
            min,
            max,
        }) => {
            assert_eq!(command, "SetRepetitionFrequency");
            assert_eq!(value, 150);
            assert_eq!((min, max), (0, 99));
        }
        other => panic!("Expected ParameterOutOfRange, got {:?}", other),
    }
    assert!(matches!(
        compose("SetShutter", Some(-1)),
        Err(ProtocolError::ParameterOutOfRange { .. })
    ));
}

#[test]
fn test_unknown_command() {
    assert!(matches!(
        compose("SelfDestruct", None),
        Err(ProtocolError::UnknownCommand(name)) if name == "SelfDestruct"
    ));
}

#[test]
fn test_parameter_ignored_for_plain_command() {
    assert_eq!(
        compose("LaserOn", Some(5)).unwrap(),
        compose("LaserOn", None).unwrap()
    );
}

#[test]
fn test_decode_request_recovers_parameter() {
    let frame = compose("SetTransmission", Some(150)).unwrap();
    assert_eq!(
        decode_request(&frame).unwrap(),
        (Command::SetTransmission, Some(150))
    );
    let frame = compose("InitAttenuator", None).unwrap();
    assert_eq!(decode_request(&frame).unwrap(), (Command::InitAttenuator, None));
}

#[test]
fn test_stat7_fixture() {
    let mut status = StatusModel::default();
    let kind = parse_frame(STAT7_FIXTURE, &mut status).unwrap();

    assert_eq!(kind, ReplyKind::Stat7);
    assert!(!status.shutter_open);
    assert!(status.ready);
    assert!(!status.standby);
    assert_eq!(status.quantity, 50);
    assert_eq!(status.frequency, 10);
    assert_eq!(status.high_voltage, 100);
    assert_eq!(status.energy, 0);
}

#[test]
fn test_corrupted_checksum_leaves_status_untouched() {
    let mut corrupted = STAT7_FIXTURE.to_vec();
    let idx = corrupted.len() - 2;
    corrupted[idx] = b'E';

    let mut status = StatusModel::default();
    let before = status.clone();
    match parse_frame(&corrupted, &mut status) {
        Err(ProtocolError::ChecksumMismatch { expected, actual }) => {
            assert_eq!(expected, "8D");
            assert_eq!(actual, "8E");
        }
        other => panic!("Expected ChecksumMismatch, got {:?}", other),
    }
    assert_eq!(status, before);
}

#[test]
fn test_unknown_reply_type() {
    let mut status = StatusModel::default();
    assert!(matches!(
        parse_frame(&reply_frame("QX00"), &mut status),
        Err(ProtocolError::UnknownReplyType(_))
    ));
}

#[test]
fn test_repeated_delimiter_is_not_stripped() {
    let mut status = StatusModel::default();
    for body in ["@W00", "!W00", "<W00"] {
        assert!(
            matches!(
                parse_frame(&reply_frame(body), &mut status),
                Err(ProtocolError::UnknownReplyType(ref b)) if b == body
            ),
            "body {:?}",
            body
        );
    }
}

#[test]
fn test_payload_ending_in_checksum_characters() {
    let mut status = StatusModel::default();
    let kind = parse_frame(b"<@!W01DDDD\r", &mut status).unwrap();
    assert_eq!(kind, ReplyKind::ShortStatus);
    assert_eq!(status.device_status, DeviceStatus::Working);
}

#[test]
fn test_signed_hex_is_malformed() {
    let mut status = StatusModel::default();
    let before = status.clone();
    for body in ["W+5", "UT+5000200320A6400000000"] {
        assert!(matches!(
            parse_frame(&reply_frame(body), &mut status),
            Err(ProtocolError::MalformedReply(_))
        ));
    }
    assert_eq!(status, before);
}

#[test]
fn test_stat7_with_nonzero_flag_byte_reads_closed() {
    let mut status = StatusModel::default();
    status.shutter_open = true;
    parse_frame(b"<@!UT040003000A14320000000088\r", &mut status).unwrap();
    assert!(!status.shutter_open);
    assert!(status.ready);
    assert!(!status.standby);
    assert_eq!(status.high_voltage, 50);
}

#[test]
fn test_frame_without_terminator_still_decodes() {
    let frame = reply_frame("W01");
    let mut status = StatusModel::default();
    parse_frame(&frame[..frame.len() - 1], &mut status).unwrap();
    assert_eq!(status.device_status, DeviceStatus::Working);
}

#[test]
fn test_stat8_keeps_stat7_fault_bits() {
    let mut status = StatusModel::default();
    // flag byte 3 = 0x61: service mode, EEPROM error, watchdog reset
    parse_frame(&reply_frame("UT05006100320A6400000000"), &mut status).unwrap();
    parse_frame(
        &reply_frame("UU0981501E1C01000005000003E8"),
        &mut status,
    )
    .unwrap();

    let faults = status.faults;
    assert!(faults.service_mode);
    assert!(faults.eeprom_error);
    assert!(faults.watchdog_reset);
    assert!(faults.static_error);
    assert!(faults.temperature_limit);
    assert!(!faults.head_open);
    assert!(faults.operation_error);
    assert!(faults.power_supply_weak);
    assert!(!faults.hv_error);
    assert!(faults.any_error());

    assert_eq!(status.internal_voltage, 0x50);
    assert_eq!(status.temperature1, 30);
    assert_eq!(status.temperature2, 28);
    assert_eq!(status.energy, 256);
    assert_eq!(status.quantity_counter, 5);
    assert_eq!(status.shot_counter, 1000);
}

#[test]
fn test_serial_numbers() {
    let mut status = StatusModel::default();
    let kind = parse_frame(&reply_frame("UV000123450BEE"), &mut status).unwrap();
    assert_eq!(kind, ReplyKind::AttenuatorStatus);
    assert_eq!(status.laser_serial_number, Some(0x12345));
    assert_eq!(status.energy_monitor_serial_number, Some(0x0BEE));
}

#[test]
fn test_energy_values_are_scaled() {
    let mut status = StatusModel::default();
    parse_frame(&reply_frame("P0202FA007D00"), &mut status).unwrap();
    assert_eq!(status.energy_samples.len(), 2);
    assert_eq!(status.energy_samples[0], 250.0);
    assert_eq!(status.energy_samples[1], 125.0);
}

#[test]
fn test_energy_values_truncated() {
    let mut status = StatusModel::default();
    assert!(matches!(
        parse_frame(&reply_frame("P0303FA00"), &mut status),
        Err(ProtocolError::MalformedReply(_))
    ));
    assert!(status.energy_samples.is_empty());
}

#[test]
fn test_firmware_version() {
    let mut status = StatusModel::default();
    let kind = parse_frame(&reply_frame("V3024A100101.02.0306PL-500"), &mut status).unwrap();
    assert_eq!(kind, ReplyKind::FirmwareVersion);

    let firmware = status.firmware.unwrap();
    assert_eq!(firmware.main_revision, 2);
    assert_eq!(firmware.release, 0x4A);
    assert_eq!(firmware.type_byte1, 0x10);
    assert_eq!(firmware.type_byte2, 0x01);
    assert_eq!(firmware.program_version, "01.02.03");
    assert_eq!(firmware.device_type, "PL-500");
    assert!(firmware.supports_attenuator());
}
