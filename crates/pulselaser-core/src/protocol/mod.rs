//! Serial Protocol Communication
//!
//! Implements the laser's ASCII telegram protocol: command composition,
//! checksummed framing, reply decoding and port discovery.

pub mod commands;
mod error;
pub mod frame;
pub mod probe;
pub mod replies;
pub mod serial;
mod stream;

use std::time::Duration;

pub use commands::{Command, CommandSpec, ParameterSpec};
pub use error::ProtocolError;
pub use frame::{checksum, compose, compose_command, decode_request, reply_frame};
pub use probe::{probe, BoundPort, PortOpener, ProbeConfig, SerialOpener};
pub use replies::{parse_frame, ReplyKind};
pub use serial::{list_ports, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Fixed baud rate of the laser's serial interface
pub const BAUD_RATE: u32 = 9600;

/// Read timeout for the serial port
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Write timeout for the serial port
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// First character of a request frame
pub const REQUEST_START_DELIMITER: char = '#';

/// First character of a response frame
pub const RESPONSE_START_DELIMITER: char = '<';

/// Address of the laser
pub const DESTINATION_ADDRESS: char = '!';

/// Address of the controlling host
pub const SOURCE_ADDRESS: char = '@';

/// Terminator of every frame
pub const END_DELIMITER: char = '\r';

/// Start of a short-status reply, used to recognize the laser while probing
pub const SHORT_STATUS_REPLY_PREFIX: &str = "<@!W";
