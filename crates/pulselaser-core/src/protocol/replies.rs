//! Reply decoding
//!
//! Routes validated reply frames to the decoder for their reply code and
//! applies the decoded values to the [`StatusModel`].
//!
//! Reply codes are one or two characters. Routing always picks the longest
//! matching code, so a one-character code never shadows a two-character code
//! starting with the same letter.

use serde::Serialize;
use std::ops::Range;

use super::{frame, ProtocolError};
use crate::status::{
    AttenuatorState, DeviceStatus, FaultFlags, FirmwareInfo, ModeFlags, StatusModel,
};

/// Scale from raw energy counts to micro joule
const ENERGY_SCALE_UJ: f64 = 250.0 / 64000.0;

/// Kind of reply frame, one per decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReplyKind {
    ShortStatus,
    Stat7,
    Stat8,
    SerialNumberBlock,
    AttenuatorStatus,
    EnergyValues,
    FirmwareVersion,
}

/// Reply code prefixes and the decoder responsible for each
pub const REPLY_ROUTES: [(&str, ReplyKind); 7] = [
    ("UT", ReplyKind::Stat7),
    ("UU", ReplyKind::Stat8),
    ("US", ReplyKind::SerialNumberBlock),
    ("UV", ReplyKind::AttenuatorStatus),
    ("W", ReplyKind::ShortStatus),
    ("P", ReplyKind::EnergyValues),
    ("V", ReplyKind::FirmwareVersion),
];

impl ReplyKind {
    /// Route a reply body to its decoder by longest matching prefix
    pub fn route(body: &str) -> Option<ReplyKind> {
        REPLY_ROUTES
            .iter()
            .filter(|(prefix, _)| body.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, kind)| *kind)
    }

    /// Number of characters of the reply code the decoder skips
    fn code_len(&self) -> usize {
        match self {
            ReplyKind::ShortStatus | ReplyKind::EnergyValues => 1,
            // Firmware replies carry the two-character code "V3"
            _ => 2,
        }
    }
}

/// Validate a raw inbound frame, decode it and update `status`
///
/// On any error the status model is left untouched.
pub fn parse_frame(raw: &[u8], status: &mut StatusModel) -> Result<ReplyKind, ProtocolError> {
    let body = frame::reply_body(raw)?;
    let kind =
        ReplyKind::route(body).ok_or_else(|| ProtocolError::UnknownReplyType(body.to_string()))?;
    let payload = body.get(kind.code_len()..).ok_or_else(|| {
        ProtocolError::MalformedReply(format!("{:?} reply missing its code", kind))
    })?;

    match kind {
        ReplyKind::ShortStatus => decode_short_status(payload)?.apply(status),
        ReplyKind::Stat7 => decode_stat7(payload)?.apply(status),
        ReplyKind::Stat8 => decode_stat8(payload)?.apply(status),
        ReplyKind::SerialNumberBlock => decode_serial_number_block(payload)?.apply(status),
        ReplyKind::AttenuatorStatus => decode_attenuator_status(payload)?.apply(status),
        ReplyKind::EnergyValues => decode_energy_values(payload)?.apply(status),
        ReplyKind::FirmwareVersion => decode_firmware(payload)?.apply(status),
    }

    Ok(kind)
}

/// Read a fixed-width hex field
fn hex_field(payload: &str, range: Range<usize>, name: &str) -> Result<u32, ProtocolError> {
    let digits = payload.get(range.clone()).ok_or_else(|| {
        ProtocolError::MalformedReply(format!(
            "{} at {:?} missing in {:?}",
            name, range, payload
        ))
    })?;
    let not_hex = || ProtocolError::MalformedReply(format!("{} is not hex: {:?}", name, digits));
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(not_hex());
    }
    u32::from_str_radix(digits, 16).map_err(|_| not_hex())
}

/// Expand a flag byte into booleans, index 0 = least significant bit
pub fn flag_bits(byte: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = byte & (1 << i) != 0;
    }
    bits
}

struct ShortStatus(DeviceStatus);

impl ShortStatus {
    fn apply(self, status: &mut StatusModel) {
        status.device_status = self.0;
    }
}

fn decode_short_status(payload: &str) -> Result<ShortStatus, ProtocolError> {
    let code = hex_field(payload, 0..2, "status code")? as u8;
    Ok(ShortStatus(DeviceStatus::from_code(code)))
}

struct Stat7 {
    flag_byte1: u8,
    flags3: [bool; 8],
    quantity: u16,
    frequency: u8,
    high_voltage: u8,
    energy: u16,
}

impl Stat7 {
    fn apply(self, status: &mut StatusModel) {
        let f1 = flag_bits(self.flag_byte1);
        // The laser clears the whole byte while the shutter is open
        status.shutter_open = self.flag_byte1 == 0;
        status.ready = f1[2];
        status.standby = f1[3];
        status.mode = ModeFlags {
            off: f1[4],
            external_trigger: f1[5],
            burst: f1[6],
            repetition: f1[7],
        };
        status.faults.service_mode = self.flags3[0];
        status.faults.eeprom_error = self.flags3[5];
        status.faults.watchdog_reset = self.flags3[6];
        status.quantity = self.quantity;
        status.frequency = self.frequency;
        status.high_voltage = self.high_voltage;
        status.energy = self.energy;
    }
}

fn decode_stat7(payload: &str) -> Result<Stat7, ProtocolError> {
    Ok(Stat7 {
        flag_byte1: hex_field(payload, 0..2, "flag byte 1")? as u8,
        flags3: flag_bits(hex_field(payload, 4..6, "flag byte 3")? as u8),
        quantity: hex_field(payload, 6..10, "quantity")? as u16,
        frequency: hex_field(payload, 10..12, "frequency")? as u8,
        high_voltage: hex_field(payload, 12..14, "high voltage")? as u8,
        energy: hex_field(payload, 18..22, "energy")? as u16,
    })
}

struct Stat8 {
    flags4: [bool; 8],
    flags5: [bool; 8],
    internal_voltage: u8,
    temperature1: u8,
    temperature2: u8,
    energy: u16,
    quantity_counter: u16,
    shot_counter: u32,
}

impl Stat8 {
    fn apply(self, status: &mut StatusModel) {
        let (f4, f5) = (self.flags4, self.flags5);
        status.faults = FaultFlags {
            static_error: f4[0],
            head_open: f4[1],
            remote: f4[2],
            temperature_limit: f4[3],
            temperature1_warning: f4[4],
            temperature2_warning: f4[5],
            energy_monitor_error: f4[6],
            operation_error: f5[0],
            hv_error: f5[3],
            temperature1_error: f5[4],
            temperature2_error: f5[5],
            power_supply_error: f5[6],
            power_supply_weak: f5[7],
            ..status.faults
        };
        status.internal_voltage = self.internal_voltage;
        status.temperature1 = self.temperature1;
        status.temperature2 = self.temperature2;
        status.energy = self.energy;
        status.quantity_counter = self.quantity_counter;
        status.shot_counter = self.shot_counter;
    }
}

fn decode_stat8(payload: &str) -> Result<Stat8, ProtocolError> {
    Ok(Stat8 {
        flags4: flag_bits(hex_field(payload, 0..2, "flag byte 4")? as u8),
        flags5: flag_bits(hex_field(payload, 2..4, "flag byte 5")? as u8),
        internal_voltage: hex_field(payload, 4..6, "internal voltage")? as u8,
        temperature1: hex_field(payload, 6..8, "temperature 1")? as u8,
        temperature2: hex_field(payload, 8..10, "temperature 2")? as u8,
        energy: hex_field(payload, 10..14, "energy")? as u16,
        quantity_counter: hex_field(payload, 14..18, "quantity counter")? as u16,
        shot_counter: hex_field(payload, 18..26, "shot counter")?,
    })
}

struct SerialNumberBlock(AttenuatorState);

impl SerialNumberBlock {
    fn apply(self, status: &mut StatusModel) {
        status.attenuator = self.0;
    }
}

fn decode_serial_number_block(payload: &str) -> Result<SerialNumberBlock, ProtocolError> {
    let raw_transmission = hex_field(payload, 10..12, "transmission")?;
    Ok(SerialNumberBlock(AttenuatorState {
        stepper_mode: hex_field(payload, 0..2, "stepper mode")? as u8,
        stepper_setpoint: hex_field(payload, 2..6, "stepper setpoint")? as u16,
        stepper_position: hex_field(payload, 6..10, "stepper position")? as u16,
        // reported in half percent
        transmission: f64::from(raw_transmission) / 2.0,
    }))
}

struct AttenuatorStatus {
    laser_serial: u32,
    energy_monitor_serial: u16,
}

impl AttenuatorStatus {
    fn apply(self, status: &mut StatusModel) {
        status.laser_serial_number = Some(self.laser_serial);
        status.energy_monitor_serial_number = Some(self.energy_monitor_serial);
    }
}

fn decode_attenuator_status(payload: &str) -> Result<AttenuatorStatus, ProtocolError> {
    Ok(AttenuatorStatus {
        laser_serial: hex_field(payload, 0..8, "laser serial number")?,
        energy_monitor_serial: hex_field(payload, 8..12, "energy monitor serial number")? as u16,
    })
}

struct EnergyValues(Vec<f64>);

impl EnergyValues {
    fn apply(self, status: &mut StatusModel) {
        status.push_energy_samples(self.0);
    }
}

fn decode_energy_values(payload: &str) -> Result<EnergyValues, ProtocolError> {
    let _stored = hex_field(payload, 0..2, "stored value count")?;
    let following = hex_field(payload, 2..4, "following value count")? as usize;

    let samples = (0..following)
        .map(|i| {
            let start = 4 + 4 * i;
            hex_field(payload, start..start + 4, "energy value")
                .map(|raw| f64::from(raw) * ENERGY_SCALE_UJ)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EnergyValues(samples))
}

struct FirmwareVersion(FirmwareInfo);

impl FirmwareVersion {
    fn apply(self, status: &mut StatusModel) {
        status.firmware = Some(self.0);
    }
}

fn decode_firmware(payload: &str) -> Result<FirmwareVersion, ProtocolError> {
    let program_version = payload
        .get(8..16)
        .ok_or_else(|| ProtocolError::MalformedReply("program version missing".to_string()))?;
    let type_len = hex_field(payload, 16..18, "device type length")? as usize;
    let device_type = payload
        .get(18..18 + type_len)
        .ok_or_else(|| ProtocolError::MalformedReply("device type truncated".to_string()))?;

    Ok(FirmwareVersion(FirmwareInfo {
        main_revision: hex_field(payload, 0..2, "main revision")? as u8,
        release: hex_field(payload, 2..4, "release byte")? as u8,
        type_byte1: hex_field(payload, 4..6, "type byte 1")? as u8,
        type_byte2: hex_field(payload, 6..8, "type byte 2")? as u8,
        program_version: program_version.to_string(),
        device_type: device_type.to_string(),
    }))
}
