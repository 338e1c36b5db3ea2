//! # PulseLaser Core Library
//!
//! Control of pulsed laser instruments over their serial ASCII protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command composition and checksummed framing
//! - Reply decoding into a live device status model
//! - Serial port discovery by handshake
//! - A background communication engine with status polling
//! - A simulated laser for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulselaser_core::prelude::*;
//!
//! // Find the laser and start talking to it
//! let engine = Engine::start(EngineConfig::default())?;
//! engine.set_repetition_rate(10)?;
//! engine.open_shutter()?;
//! engine.repetition_on()?;
//!
//! // Watch status snapshots
//! let mut updates = engine.subscribe();
//! updates.changed().await?;
//! println!("shots: {}", updates.borrow().shot_counter);
//! ```

pub mod config;
pub mod engine;
pub mod protocol;
pub mod simulator;
pub mod status;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{ConnectionState, Engine, EngineStats, InboundFrame};
    pub use crate::protocol::{Command, ProtocolError, ReplyKind};
    pub use crate::simulator::SimulatedLaser;
    pub use crate::status::{DeviceStatus, StatusModel};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
