//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the laser
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Parameter {value} out of range for {command} (allowed {min}..={max})")]
    ParameterOutOfRange {
        command: String,
        value: i64,
        min: u32,
        max: u32,
    },

    #[error("Command {0} requires a parameter")]
    MissingParameter(String),

    #[error("Checksum mismatch: expected '{expected}', got '{actual}'")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unknown reply type: {0}")]
    UnknownReplyType(String),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Failed to open port {port}: {reason}")]
    PortOpenFailed { port: String, reason: String },

    #[error("No laser found on any of {tried} candidate port(s)")]
    DeviceNotFound { tried: usize },

    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Communication engine is not running")]
    NotRunning,

    #[error("Timed out waiting for the communication worker to stop")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
