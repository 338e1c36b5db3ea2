//! Simulated laser
//!
//! An in-process [`CommunicationChannel`] that answers the protocol like a
//! real device. Requests written to it are decoded and applied to a small
//! device state; query replies are queued for reading. Temperatures and
//! measured energy wander randomly so a monitor has something to show.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

use crate::protocol::{decode_request, reply_frame, Command, CommunicationChannel, END_DELIMITER};

const DEVICE_TYPE: &str = "PL-SIM";
const PROGRAM_VERSION: &str = "01.02.03";
const LASER_SERIAL: u32 = 0x0001_2345;
const ENERGY_MONITOR_SERIAL: u16 = 0x0BEE;
/// Firmware release byte: attenuator, HV control and energy measurement
const RELEASE_FLAGS: u8 = 0x4A;
/// Energy values returned per `GetEnergyValues` query
const ENERGY_BATCH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiringMode {
    Off,
    Standby,
    Repetition,
    Burst,
    ExternalTrigger,
}

#[derive(Debug, Clone)]
struct DeviceState {
    mode: FiringMode,
    shutter_open: bool,
    quantity: u16,
    frequency: u8,
    high_voltage: u8,
    temperature1: f64,
    temperature2: f64,
    quantity_counter: u16,
    shot_counter: u32,
    stepper_setpoint: u16,
    stepper_position: u16,
    /// Half percent
    transmission: u8,
    attenuation_energy: u16,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            mode: FiringMode::Off,
            shutter_open: false,
            quantity: 50,
            frequency: 10,
            high_voltage: 80,
            temperature1: 30.0,
            temperature2: 28.0,
            quantity_counter: 0,
            shot_counter: 0,
            stepper_setpoint: 0,
            stepper_position: 0,
            transmission: 200,
            attenuation_energy: 0,
        }
    }
}

impl DeviceState {
    fn is_firing(&self) -> bool {
        matches!(
            self.mode,
            FiringMode::Repetition | FiringMode::Burst | FiringMode::ExternalTrigger
        )
    }

    fn flag_byte1(&self) -> u8 {
        // the whole byte reads zero while the shutter is open
        if self.shutter_open {
            return 0;
        }
        let mut flags = 1 << 0;
        if self.mode != FiringMode::Off {
            flags |= 1 << 2;
        }
        match self.mode {
            FiringMode::Standby => flags |= 1 << 3,
            FiringMode::Off => flags |= 1 << 4,
            FiringMode::ExternalTrigger => flags |= 1 << 5,
            FiringMode::Burst => flags |= 1 << 6,
            FiringMode::Repetition => flags |= 1 << 7,
        }
        flags
    }
}

/// A laser that lives in memory
pub struct SimulatedLaser {
    state: DeviceState,
    /// Request bytes not yet terminated
    inbound: Vec<u8>,
    /// Reply bytes waiting to be read
    outbound: VecDeque<u8>,
    rng: StdRng,
}

impl Default for SimulatedLaser {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLaser {
    /// Create a simulator seeded from entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a simulator with reproducible jitter
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: DeviceState::default(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            rng,
        }
    }

    /// Whether the simulated shutter is open
    pub fn shutter_open(&self) -> bool {
        self.state.shutter_open
    }

    /// Current high voltage setpoint
    pub fn high_voltage(&self) -> u8 {
        self.state.high_voltage
    }

    /// Total shots fired so far
    pub fn shot_counter(&self) -> u32 {
        self.state.shot_counter
    }

    fn handle_request(&mut self, raw: &[u8]) {
        let (command, parameter) = match decode_request(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "simulator ignoring request {:?}: {}",
                    String::from_utf8_lossy(raw),
                    e
                );
                return;
            }
        };
        debug!("simulator received {} {:?}", command, parameter);

        let value = parameter.unwrap_or(0);
        let state = &mut self.state;
        match command {
            Command::LaserOff => state.mode = FiringMode::Off,
            Command::LaserOn | Command::LaserStop => state.mode = FiringMode::Standby,
            Command::RepetitionOn => self.start_firing(FiringMode::Repetition),
            Command::BurstOn => self.start_firing(FiringMode::Burst),
            Command::ExtTrigmode => self.start_firing(FiringMode::ExternalTrigger),
            Command::SetBurstQuantity => state.quantity = value as u16,
            Command::SetRepetitionFrequency => state.frequency = value as u8,
            Command::SetHV => state.high_voltage = value as u8,
            Command::IncrementHV => {
                state.high_voltage = state.high_voltage.saturating_add(1).min(100)
            }
            Command::DecrementHV => state.high_voltage = state.high_voltage.saturating_sub(1),
            Command::SetShutter => state.shutter_open = value == 1,
            Command::SetStepperPosition => {
                state.stepper_setpoint = value as u16;
                state.stepper_position = value as u16;
            }
            Command::SetTransmission => state.transmission = value as u8,
            Command::SetAttenuationEnergy => state.attenuation_energy = value as u16,
            Command::InitAttenuator => {
                state.stepper_setpoint = 0;
                state.stepper_position = 0;
            }
            Command::GetShortStatus => self.reply_short_status(),
            Command::GetStat7 => self.reply_stat7(),
            Command::GetStat8 => self.reply_stat8(),
            Command::GetVer3 => self.reply_firmware(),
            Command::GetSernum => self.reply_attenuator_block(),
            Command::GetAttenuatorStatus => self.reply_serial_numbers(),
            Command::GetEnergyValues => self.reply_energy_values(),
        }
    }

    fn start_firing(&mut self, mode: FiringMode) {
        if self.state.mode == FiringMode::Off {
            warn!("simulator: {:?} requested while the laser is off", mode);
            return;
        }
        self.state.mode = mode;
        self.state.quantity_counter = 0;
    }

    /// Advance counters and let temperatures drift
    fn tick(&mut self) {
        if self.state.is_firing() {
            let shots = u16::from(self.state.frequency).max(1);
            self.state.shot_counter = self.state.shot_counter.wrapping_add(u32::from(shots));
            self.state.quantity_counter = self.state.quantity_counter.saturating_add(shots);
            if self.state.mode == FiringMode::Burst
                && self.state.quantity_counter >= self.state.quantity
            {
                self.state.quantity_counter = self.state.quantity;
                self.state.mode = FiringMode::Standby;
            }
        }

        let heating = if self.state.is_firing() { 0.2 } else { -0.1 };
        self.state.temperature1 =
            (self.state.temperature1 + heating + self.rng.gen_range(-0.3..0.3)).clamp(20.0, 70.0);
        self.state.temperature2 =
            (self.state.temperature2 + heating + self.rng.gen_range(-0.3..0.3)).clamp(20.0, 70.0);
    }

    fn measured_energy(&mut self) -> u16 {
        if !self.state.is_firing() || !self.state.shutter_open {
            return 0;
        }
        let nominal = f64::from(self.state.high_voltage) * 400.0
            * f64::from(self.state.transmission)
            / 200.0;
        let jitter = self.rng.gen_range(0.97..1.03);
        (nominal * jitter).clamp(0.0, f64::from(u16::MAX)) as u16
    }

    fn queue_reply(&mut self, body: String) {
        self.outbound.extend(reply_frame(&body));
    }

    fn reply_short_status(&mut self) {
        let temperature = self.state.temperature1.max(self.state.temperature2);
        let code = if temperature > 48.0 {
            0x05
        } else if self.state.is_firing() {
            0x01
        } else {
            0x00
        };
        self.queue_reply(format!("W{:02X}", code));
    }

    fn reply_stat7(&mut self) {
        let energy = self.measured_energy();
        let body = format!(
            "UT{:02X}00{:02X}{:04X}{:02X}{:02X}0000{:04X}",
            self.state.flag_byte1(),
            0u8,
            self.state.quantity,
            self.state.frequency,
            self.state.high_voltage,
            energy,
        );
        self.queue_reply(body);
    }

    fn reply_stat8(&mut self) {
        self.tick();
        let mut flags4 = 0u8;
        let hottest = self.state.temperature1.max(self.state.temperature2);
        if hottest > 60.0 {
            flags4 |= 1 << 3;
        }
        if self.state.temperature1 > 45.0 {
            flags4 |= 1 << 4;
        }
        if self.state.temperature2 > 45.0 {
            flags4 |= 1 << 5;
        }
        let energy = self.measured_energy();
        let body = format!(
            "UU{:02X}{:02X}{:02X}{:02X}{:02X}{:04X}{:04X}{:08X}",
            flags4,
            0u8,
            self.state.high_voltage,
            self.state.temperature1.round() as u8,
            self.state.temperature2.round() as u8,
            energy,
            self.state.quantity_counter,
            self.state.shot_counter,
        );
        self.queue_reply(body);
    }

    fn reply_firmware(&mut self) {
        let body = format!(
            "V3{:02X}{:02X}{:02X}{:02X}{}{:02X}{}",
            2u8,
            RELEASE_FLAGS,
            0x10u8,
            0x01u8,
            PROGRAM_VERSION,
            DEVICE_TYPE.len(),
            DEVICE_TYPE,
        );
        self.queue_reply(body);
    }

    fn reply_attenuator_block(&mut self) {
        let body = format!(
            "US{:02X}{:04X}{:04X}{:02X}",
            1u8, self.state.stepper_setpoint, self.state.stepper_position, self.state.transmission,
        );
        self.queue_reply(body);
    }

    fn reply_serial_numbers(&mut self) {
        self.queue_reply(format!("UV{:08X}{:04X}", LASER_SERIAL, ENERGY_MONITOR_SERIAL));
    }

    fn reply_energy_values(&mut self) {
        let samples: Vec<u16> = (0..ENERGY_BATCH).map(|_| self.measured_energy()).collect();
        let mut body = format!("P{:02X}{:02X}", samples.len(), samples.len());
        for sample in samples {
            body.push_str(&format!("{:04X}", sample));
        }
        self.queue_reply(body);
    }
}

impl Read for SimulatedLaser {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedLaser {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(buf);
        while let Some(pos) = self.inbound.iter().position(|b| *b == END_DELIMITER as u8) {
            let request: Vec<u8> = self.inbound.drain(..=pos).collect();
            self.handle_request(&request);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for SimulatedLaser {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.outbound.len() as u32)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }
}
