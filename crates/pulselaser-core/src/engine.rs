//! Communication engine
//!
//! Owns the connection to the laser on a dedicated worker thread. Every loop
//! iteration drains inbound frames into the status model, writes at most one
//! queued command, sleeps briefly and, when due, queues the status-poll
//! bundle. Callers submit commands through [`Engine`] without blocking and
//! receive status snapshots through a watch channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::protocol::{
    compose, compose_command, decode_request, parse_frame, probe, Command, CommunicationChannel,
    PortOpener, ProtocolError, END_DELIMITER,
};
use crate::status::StatusModel;

/// Bytes kept without seeing a terminator before the buffer is discarded
const MAX_PENDING_BYTES: usize = 4096;

/// How often shutdown checks whether the worker has exited
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A raw frame as received from the laser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundFrame {
    /// When the frame was split off the input stream
    pub received_at: DateTime<Utc>,
    /// Frame text without the terminator
    pub raw: String,
}

/// Counters and fault state of the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub io_errors: u64,
    pub consecutive_io_failures: u32,
    pub last_error: Option<String>,
    /// Set once repeated I/O failures made the engine give up
    pub io_fault: bool,
}

/// Connection bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Bound port
    pub port_name: String,
    /// Whether the worker still owns an open channel
    pub open: bool,
    /// When the last status-poll bundle was queued
    pub last_poll: Option<Instant>,
}

struct Shared {
    running: AtomicBool,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    status: Mutex<StatusModel>,
    history: Mutex<VecDeque<InboundFrame>>,
    stats: Mutex<EngineStats>,
    connection: Mutex<ConnectionState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the running communication engine
pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    status_rx: watch::Receiver<StatusModel>,
    shutdown_timeout: Duration,
}

impl Engine {
    /// Find the laser on the host's serial ports and start the engine
    pub fn start(config: EngineConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        let bound = probe::probe_serial_ports(config.port_name.as_deref(), &config.probe)?;
        Self::with_channel(bound.name, bound.channel, config)
    }

    /// Probe `discovered` ports through `opener` and start the engine
    pub fn start_with_opener(
        opener: &mut dyn PortOpener,
        discovered: &[String],
        config: EngineConfig,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let bound = probe::probe(opener, config.port_name.as_deref(), discovered, &config.probe)?;
        Self::with_channel(bound.name, bound.channel, config)
    }

    /// Start the engine on an already bound channel
    pub fn with_channel(
        port_name: impl Into<String>,
        channel: Box<dyn CommunicationChannel>,
        config: EngineConfig,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let port_name = port_name.into();
        let status = StatusModel::with_energy_capacity(config.energy_sample_capacity);
        let (status_tx, status_rx) = watch::channel(status.clone());

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            outbound: Mutex::new(VecDeque::new()),
            status: Mutex::new(status),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            stats: Mutex::new(EngineStats::default()),
            connection: Mutex::new(ConnectionState {
                port_name: port_name.clone(),
                open: true,
                last_poll: None,
            }),
        });

        let shutdown_timeout = config.shutdown_timeout();
        let worker = Worker {
            shared: Arc::clone(&shared),
            channel,
            config,
            status_tx,
            pending: Vec::new(),
        };

        info!("starting communication engine on {}", port_name);
        let handle = thread::Builder::new()
            .name("laser-comm".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            worker: Some(handle),
            status_rx,
            shutdown_timeout,
        })
    }

    /// Queue a command by name
    pub fn execute(&self, name: &str, parameter: Option<i64>) -> Result<(), ProtocolError> {
        let frame = compose(name, parameter)?;
        self.enqueue(frame)
    }

    /// Queue a command
    pub fn execute_command(
        &self,
        command: Command,
        parameter: Option<i64>,
    ) -> Result<(), ProtocolError> {
        let frame = compose_command(command, parameter)?;
        self.enqueue(frame)
    }

    fn enqueue(&self, frame: Vec<u8>) -> Result<(), ProtocolError> {
        if !self.is_running() {
            return Err(ProtocolError::NotRunning);
        }
        lock(&self.shared.outbound).push_back(frame);
        Ok(())
    }

    pub fn laser_on(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::LaserOn, None)
    }

    pub fn laser_off(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::LaserOff, None)
    }

    pub fn open_shutter(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetShutter, Some(1))
    }

    pub fn close_shutter(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetShutter, Some(0))
    }

    /// Close the shutter if the laser reports it open, open it otherwise
    pub fn toggle_shutter(&self) -> Result<(), ProtocolError> {
        let open = lock(&self.shared.status).shutter_open;
        if open {
            self.close_shutter()
        } else {
            self.open_shutter()
        }
    }

    pub fn repetition_on(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::RepetitionOn, None)
    }

    pub fn burst_on(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::BurstOn, None)
    }

    pub fn external_trigger_on(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::ExtTrigmode, None)
    }

    /// Stop firing
    pub fn stop(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::LaserStop, None)
    }

    /// Set the repetition frequency in Hz
    pub fn set_repetition_rate(&self, frequency: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetRepetitionFrequency, Some(i64::from(frequency)))
    }

    /// Set the number of shots per burst
    pub fn set_repetition_quantity(&self, quantity: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetBurstQuantity, Some(i64::from(quantity)))
    }

    pub fn set_high_voltage(&self, value: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetHV, Some(i64::from(value)))
    }

    pub fn increment_high_voltage(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::IncrementHV, None)
    }

    pub fn decrement_high_voltage(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::DecrementHV, None)
    }

    /// Set attenuator transmission in half percent (0-200)
    pub fn set_transmission(&self, half_percent: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetTransmission, Some(i64::from(half_percent)))
    }

    pub fn set_stepper_position(&self, position: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetStepperPosition, Some(i64::from(position)))
    }

    pub fn set_attenuation_energy(&self, energy: u32) -> Result<(), ProtocolError> {
        self.execute_command(Command::SetAttenuationEnergy, Some(i64::from(energy)))
    }

    pub fn init_attenuator(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::InitAttenuator, None)
    }

    /// Ask for the stored energy values; they are appended to the status model
    pub fn request_energy_values(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::GetEnergyValues, None)
    }

    pub fn request_firmware_version(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::GetVer3, None)
    }

    /// Ask for the laser and energy monitor serial numbers
    pub fn request_serial_numbers(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::GetAttenuatorStatus, None)
    }

    /// Ask for the attenuator stepper block
    pub fn request_attenuator_state(&self) -> Result<(), ProtocolError> {
        self.execute_command(Command::GetSernum, None)
    }

    /// Current status snapshot
    pub fn status(&self) -> StatusModel {
        lock(&self.shared.status).clone()
    }

    /// Receiver that is notified after every loop iteration that decoded a frame
    pub fn subscribe(&self) -> watch::Receiver<StatusModel> {
        self.status_rx.clone()
    }

    /// Retained inbound frames, oldest first
    pub fn recent_frames(&self) -> Vec<InboundFrame> {
        lock(&self.shared.history).iter().cloned().collect()
    }

    pub fn stats(&self) -> EngineStats {
        lock(&self.shared.stats).clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.shared.connection).clone()
    }

    /// Port the engine is bound to
    pub fn port_name(&self) -> String {
        lock(&self.shared.connection).port_name.clone()
    }

    /// Number of commands waiting to be written
    pub fn queued_commands(&self) -> usize {
        lock(&self.shared.outbound).len()
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Returns [`ProtocolError::Timeout`] if the worker does not exit within
    /// the configured shutdown timeout; it is then detached.
    pub fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.shared.running.store(false, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                error!(
                    "communication worker did not stop within {:?}, detaching it",
                    self.shutdown_timeout
                );
                return Err(ProtocolError::Timeout);
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }

        if handle.join().is_err() {
            error!("communication worker panicked");
        }
        info!("communication engine stopped");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("engine shutdown on drop: {}", e);
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    channel: Box<dyn CommunicationChannel>,
    config: EngineConfig,
    status_tx: watch::Sender<StatusModel>,
    pending: Vec<u8>,
}

impl Worker {
    fn run(mut self) {
        thread::sleep(self.config.startup_delay());
        debug!("communication loop started");

        while self.shared.running.load(Ordering::Acquire) {
            if self.drain_inbound() > 0 {
                self.publish_status();
            }
            self.send_next();

            if lock(&self.shared.stats).io_fault {
                break;
            }

            thread::sleep(self.config.idle_delay());
            self.poll_if_due();
        }

        lock(&self.shared.connection).open = false;
        self.shared.running.store(false, Ordering::Release);
        debug!("communication loop ended");
    }

    /// Read what is available and decode complete frames; returns the number decoded
    fn drain_inbound(&mut self) -> usize {
        let mut decoded = 0;
        let mut buf = [0u8; 512];

        for _ in 0..self.config.read_burst_limit {
            let available = match self.channel.bytes_to_read() {
                Ok(0) => break,
                Ok(n) => n as usize,
                Err(e) => {
                    self.record_io_error("bytes_to_read", e);
                    break;
                }
            };

            let len = available.min(buf.len());
            match self.channel.read(&mut buf[..len]) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.record_io_success();
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    break;
                }
                Err(e) => {
                    self.record_io_error("read", e);
                    break;
                }
            }

            decoded += self.process_pending();
        }

        decoded
    }

    fn process_pending(&mut self) -> usize {
        let mut decoded = 0;

        while let Some(pos) = self.pending.iter().position(|b| *b == END_DELIMITER as u8) {
            let frame: Vec<u8> = self.pending.drain(..=pos).collect();
            let frame = &frame[..pos];
            if frame.is_empty() {
                continue;
            }
            if self.handle_frame(frame) {
                decoded += 1;
            }
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            warn!(
                "discarding {} bytes received without a frame terminator",
                self.pending.len()
            );
            self.pending.clear();
        }

        decoded
    }

    fn handle_frame(&mut self, frame: &[u8]) -> bool {
        self.remember(frame);

        let result = {
            let mut status = lock(&self.shared.status);
            parse_frame(frame, &mut status)
        };

        let mut stats = lock(&self.shared.stats);
        stats.frames_received += 1;
        match result {
            Ok(kind) => {
                debug!("decoded {:?} reply", kind);
                stats.frames_decoded += 1;
                true
            }
            Err(e) => {
                warn!(
                    "dropping inbound frame {:?}: {}",
                    String::from_utf8_lossy(frame),
                    e
                );
                stats.decode_errors += 1;
                stats.last_error = Some(e.to_string());
                false
            }
        }
    }

    fn remember(&self, frame: &[u8]) {
        let mut history = lock(&self.shared.history);
        while history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(InboundFrame {
            received_at: Utc::now(),
            raw: String::from_utf8_lossy(frame).into_owned(),
        });
    }

    fn publish_status(&self) {
        let snapshot = lock(&self.shared.status).clone();
        self.status_tx.send_replace(snapshot);
    }

    fn send_next(&mut self) {
        let Some(frame) = lock(&self.shared.outbound).pop_front() else {
            return;
        };

        let result = self
            .channel
            .write_all(&frame)
            .and_then(|_| self.channel.flush());
        match result {
            Ok(()) => {
                match decode_request(&frame) {
                    Ok((command, Some(parameter))) => debug!("sent {} {}", command, parameter),
                    Ok((command, None)) => debug!("sent {}", command),
                    Err(_) => debug!("sent {:?}", String::from_utf8_lossy(&frame)),
                }
                lock(&self.shared.stats).frames_sent += 1;
                self.record_io_success();
            }
            Err(e) => self.record_io_error("write", e),
        }
    }

    fn poll_if_due(&mut self) {
        let interval = self.config.poll_interval();
        let mut connection = lock(&self.shared.connection);
        let due = connection
            .last_poll
            .map_or(true, |last| last.elapsed() >= interval);
        if !due {
            return;
        }
        connection.last_poll = Some(Instant::now());
        drop(connection);

        let mut outbound = lock(&self.shared.outbound);
        for command in Command::POLL_BUNDLE {
            match compose_command(command, None) {
                Ok(frame) => outbound.push_back(frame),
                Err(e) => warn!("cannot compose {}: {}", command, e),
            }
        }
    }

    fn record_io_success(&self) {
        lock(&self.shared.stats).consecutive_io_failures = 0;
    }

    fn record_io_error(&self, operation: &str, e: io::Error) {
        let mut stats = lock(&self.shared.stats);
        stats.io_errors += 1;
        stats.consecutive_io_failures += 1;
        stats.last_error = Some(format!("{} failed: {}", operation, e));
        warn!("serial {} failed: {}", operation, e);

        if stats.consecutive_io_failures >= self.config.max_consecutive_io_failures {
            error!(
                "{} consecutive I/O failures, giving up on the laser",
                stats.consecutive_io_failures
            );
            stats.io_fault = true;
        }
    }
}
