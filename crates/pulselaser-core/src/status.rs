//! Device status model
//!
//! Last-known state of the laser as reported by its status replies. The
//! model is only ever written by the reply decoders; everyone else reads
//! cloned snapshots.

use serde::Serialize;
use std::collections::VecDeque;

/// Default bound on retained energy samples
pub const DEFAULT_ENERGY_SAMPLE_CAPACITY: usize = 10_000;

/// One-byte short status reported in reply to `GetShortStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DeviceStatus {
    /// No short status received yet
    #[default]
    Unknown,
    /// Laser in standby (00)
    Standby,
    /// Laser is working (01)
    Working,
    /// EEPROM error (03)
    EepromError,
    /// Energy monitor error occurred (04)
    EnergyMonitorError,
    /// Temperature too high, above 48 °C (05)
    OverTemperature,
    /// Static error (06)
    StaticError,
    /// Operation error, laser must be switched off (07)
    OperationError,
    /// A code this library does not know
    Other(u8),
}

impl DeviceStatus {
    /// Map a status code to its meaning
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DeviceStatus::Standby,
            0x01 => DeviceStatus::Working,
            0x03 => DeviceStatus::EepromError,
            0x04 => DeviceStatus::EnergyMonitorError,
            0x05 => DeviceStatus::OverTemperature,
            0x06 => DeviceStatus::StaticError,
            0x07 => DeviceStatus::OperationError,
            other => DeviceStatus::Other(other),
        }
    }

    /// Human readable description
    pub fn description(&self) -> String {
        match self {
            DeviceStatus::Unknown => "Unknown".to_string(),
            DeviceStatus::Standby => "Standby".to_string(),
            DeviceStatus::Working => "Laser is working".to_string(),
            DeviceStatus::EepromError => "EEPROM error".to_string(),
            DeviceStatus::EnergyMonitorError => "Energy monitor error occurred".to_string(),
            DeviceStatus::OverTemperature => "Temperature too high (>48°C)".to_string(),
            DeviceStatus::StaticError => "Static error".to_string(),
            DeviceStatus::OperationError => {
                "Operation error: laser must be switched off".to_string()
            }
            DeviceStatus::Other(code) => format!("Unrecognized status code {:02X}", code),
        }
    }
}

/// Firing mode flags from status block 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModeFlags {
    pub off: bool,
    pub repetition: bool,
    pub burst: bool,
    pub external_trigger: bool,
}

/// Fault and warning flags from status blocks 7 and 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FaultFlags {
    pub service_mode: bool,
    pub eeprom_error: bool,
    pub watchdog_reset: bool,
    pub static_error: bool,
    pub head_open: bool,
    /// External interlock circuit open
    pub remote: bool,
    /// Temperature above 60 °C
    pub temperature_limit: bool,
    pub temperature1_warning: bool,
    pub temperature2_warning: bool,
    pub energy_monitor_error: bool,
    pub operation_error: bool,
    /// High voltage supply or temperature error
    pub hv_error: bool,
    pub temperature1_error: bool,
    pub temperature2_error: bool,
    /// Power switch damaged
    pub power_supply_error: bool,
    pub power_supply_weak: bool,
}

impl FaultFlags {
    /// True if any error (not just warning) flag is raised
    pub fn any_error(&self) -> bool {
        self.eeprom_error
            || self.static_error
            || self.energy_monitor_error
            || self.operation_error
            || self.hv_error
            || self.temperature1_error
            || self.temperature2_error
            || self.power_supply_error
    }
}

/// Attenuator stepper block from `GetSernum`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AttenuatorState {
    pub stepper_mode: u8,
    pub stepper_setpoint: u16,
    pub stepper_position: u16,
    /// Actual transmission in percent
    pub transmission: f64,
}

/// Firmware information from `GetVer3`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FirmwareInfo {
    pub main_revision: u8,
    pub release: u8,
    pub type_byte1: u8,
    pub type_byte2: u8,
    pub program_version: String,
    pub device_type: String,
}

impl FirmwareInfo {
    /// Shutter control supported (release bit 0 is a "not supported" flag)
    pub fn supports_shutter(&self) -> bool {
        self.release & 0x01 == 0
    }

    /// Attenuation module supported
    pub fn supports_attenuator(&self) -> bool {
        self.release & 0x02 != 0
    }

    /// High voltage control supported
    pub fn supports_hv_control(&self) -> bool {
        self.release & 0x08 != 0
    }

    /// Energy measurement supported
    pub fn supports_energy_measurement(&self) -> bool {
        self.release & 0x40 != 0
    }
}

/// Last-known device state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusModel {
    pub device_status: DeviceStatus,
    pub shutter_open: bool,
    pub ready: bool,
    pub standby: bool,
    pub mode: ModeFlags,
    pub faults: FaultFlags,
    /// Burst quantity setpoint
    pub quantity: u16,
    /// Repetition frequency in Hz
    pub frequency: u8,
    /// High voltage setpoint
    pub high_voltage: u8,
    pub internal_voltage: u8,
    pub temperature1: u8,
    pub temperature2: u8,
    /// Raw energy reading from the last status block
    pub energy: u16,
    /// Shots fired in the current burst
    pub quantity_counter: u16,
    /// Total shots fired
    pub shot_counter: u32,
    pub attenuator: AttenuatorState,
    pub laser_serial_number: Option<u32>,
    pub energy_monitor_serial_number: Option<u16>,
    pub firmware: Option<FirmwareInfo>,
    /// Energy samples in micro joule, oldest first
    pub energy_samples: VecDeque<f64>,
    energy_sample_capacity: usize,
}

impl Default for StatusModel {
    fn default() -> Self {
        Self::with_energy_capacity(DEFAULT_ENERGY_SAMPLE_CAPACITY)
    }
}

impl StatusModel {
    /// Create an empty model retaining at most `capacity` energy samples
    pub fn with_energy_capacity(capacity: usize) -> Self {
        Self {
            device_status: DeviceStatus::Unknown,
            shutter_open: false,
            ready: false,
            standby: false,
            mode: ModeFlags::default(),
            faults: FaultFlags::default(),
            quantity: 0,
            frequency: 0,
            high_voltage: 0,
            internal_voltage: 0,
            temperature1: 0,
            temperature2: 0,
            energy: 0,
            quantity_counter: 0,
            shot_counter: 0,
            attenuator: AttenuatorState::default(),
            laser_serial_number: None,
            energy_monitor_serial_number: None,
            firmware: None,
            energy_samples: VecDeque::new(),
            energy_sample_capacity: capacity,
        }
    }

    /// Maximum number of energy samples kept
    pub fn energy_sample_capacity(&self) -> usize {
        self.energy_sample_capacity
    }

    /// Append energy samples, dropping the oldest beyond capacity
    pub(crate) fn push_energy_samples(&mut self, samples: impl IntoIterator<Item = f64>) {
        for sample in samples {
            if self.energy_sample_capacity == 0 {
                return;
            }
            while self.energy_samples.len() >= self.energy_sample_capacity {
                self.energy_samples.pop_front();
            }
            self.energy_samples.push_back(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DeviceStatus::from_code(0), DeviceStatus::Standby);
        assert_eq!(DeviceStatus::from_code(7), DeviceStatus::OperationError);
        assert_eq!(DeviceStatus::from_code(2), DeviceStatus::Other(2));
    }

    #[test]
    fn test_energy_samples_bounded() {
        let mut model = StatusModel::with_energy_capacity(3);
        model.push_energy_samples([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(model.energy_samples, VecDeque::from(vec![3.0, 4.0, 5.0]));
    }

    #[test]
    fn test_firmware_capabilities() {
        let fw = FirmwareInfo {
            release: 0x4A,
            ..Default::default()
        };
        assert!(fw.supports_shutter());
        assert!(fw.supports_attenuator());
        assert!(fw.supports_hv_control());
        assert!(fw.supports_energy_measurement());
    }
}
