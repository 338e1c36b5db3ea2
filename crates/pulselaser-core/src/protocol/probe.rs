//! Port discovery
//!
//! Finds the serial port the laser is attached to by sending a short
//! handshake to each candidate and looking for a short-status reply.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    frame, serial, Command, CommunicationChannel, ProtocolError, SerialChannel,
    END_DELIMITER, SHORT_STATUS_REPLY_PREFIX,
};

/// Upper bound on bytes collected from one candidate
const MAX_PROBE_BYTES: usize = 1024;

/// Opens channels by port name
///
/// Implemented for real serial ports by [`SerialOpener`]; tests provide
/// their own implementation.
pub trait PortOpener {
    /// Open the named port with the laser's line parameters
    fn open(&mut self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&mut self, name: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        let channel = SerialChannel::open(name)?;
        Ok(Box::new(channel))
    }
}

/// Timing of the probe handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Delay after opening a port before talking to it
    pub settle_delay_ms: u64,
    /// Delay between sending the handshake and checking for a reply
    pub reply_wait_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 200,
            reply_wait_ms: 300,
        }
    }
}

/// A port that answered the handshake, still open
pub struct BoundPort {
    /// Port name
    pub name: String,
    /// Open channel to the laser
    pub channel: Box<dyn CommunicationChannel>,
}

impl std::fmt::Debug for BoundPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundPort").field("name", &self.name).finish()
    }
}

/// Order in which ports are tried: the requested port first, then every
/// discovered port in discovery order (the requested one is not repeated)
pub fn candidate_order(requested: Option<&str>, discovered: &[String]) -> Vec<String> {
    let mut order: Vec<String> = requested.map(|r| vec![r.to_string()]).unwrap_or_default();
    for name in discovered {
        if Some(name.as_str()) != requested {
            order.push(name.clone());
        }
    }
    order
}

/// Probe the candidates and bind the first port the laser answers on
///
/// Every channel that does not answer is dropped, which closes it.
pub fn probe(
    opener: &mut dyn PortOpener,
    requested: Option<&str>,
    discovered: &[String],
    config: &ProbeConfig,
) -> Result<BoundPort, ProtocolError> {
    let candidates = candidate_order(requested, discovered);
    info!("probing {} candidate port(s) for the laser", candidates.len());

    for name in &candidates {
        match try_candidate(opener, name, config) {
            Ok(Some(channel)) => {
                info!("laser found on {}", name);
                return Ok(BoundPort {
                    name: name.clone(),
                    channel,
                });
            }
            Ok(None) => debug!("no short-status reply on {}", name),
            Err(e) => warn!("probe of {} failed: {}", name, e),
        }
    }

    Err(ProtocolError::DeviceNotFound {
        tried: candidates.len(),
    })
}

/// Probe the host's serial ports
pub fn probe_serial_ports(
    requested: Option<&str>,
    config: &ProbeConfig,
) -> Result<BoundPort, ProtocolError> {
    let discovered: Vec<String> = serial::list_ports().into_iter().map(|p| p.name).collect();
    probe(&mut SerialOpener, requested, &discovered, config)
}

fn try_candidate(
    opener: &mut dyn PortOpener,
    name: &str,
    config: &ProbeConfig,
) -> Result<Option<Box<dyn CommunicationChannel>>, ProtocolError> {
    let mut channel = opener.open(name)?;

    std::thread::sleep(Duration::from_millis(config.settle_delay_ms));
    channel.clear_input_buffer()?;

    // Handshake: switch on, then ask for the short status
    for command in [Command::LaserOn, Command::GetShortStatus] {
        let request = frame::compose_command(command, None)?;
        channel.write_all(&request)?;
    }
    channel.flush()?;

    std::thread::sleep(Duration::from_millis(config.reply_wait_ms));

    let received = read_available(channel.as_mut())?;
    if contains_short_status(&received) {
        Ok(Some(channel))
    } else {
        Ok(None)
    }
}

fn read_available(channel: &mut dyn CommunicationChannel) -> Result<Vec<u8>, ProtocolError> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];

    while received.len() < MAX_PROBE_BYTES {
        let available = channel.bytes_to_read()? as usize;
        if available == 0 {
            break;
        }
        let len = available.min(buf.len());
        let n = channel.read(&mut buf[..len])?;
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }

    Ok(received)
}

fn contains_short_status(received: &[u8]) -> bool {
    received
        .split(|b| *b == END_DELIMITER as u8)
        .any(|frame| frame.starts_with(SHORT_STATUS_REPLY_PREFIX.as_bytes()))
}
