//! # cnclink
//!
//! A Rust client library for G-code CNC machines over USB/Serial.
//!
//! This library drives motion-stage controllers (spindle/drill and laser
//! tool heads) that speak a line-oriented G-code-like protocol with an
//! ad-hoc status-report grammar.
//!
//! ## Features
//!
//! - Port discovery with a handshake probe to find the right controller
//! - Typed command encoding for motion, spindle, laser, and SD playback
//! - One canonical machine state decoded from both status-report grammars
//! - Deadline-bounded orchestration of homing and drill cycles
//!
//! ## Quick Start
//!
//! ```no_run
//! use cnclink::CncLink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cnclink::Error> {
//!     // Connect to a controller
//!     let mut link = CncLink::serial("/dev/tty.usbmodem1432");
//!     link.connect().await?;
//!
//!     // Home, then jog the camera over the target and calibrate
//!     link.home().await?;
//!     link.calibrate_contact_height().await?;
//!
//!     // Drill a hole at camera coordinates
//!     link.drill_hole(12.0, 34.0).await?;
//!
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Command encoding, line assembly, status/progress decoding
//! - [`transport`] - Transport abstraction, serial implementation, discovery
//! - [`settings`] - Operational parameters and calibration values
//! - [`client`] - High-level [`CncLink`] session and machine sequences

pub mod client;
pub mod error;
pub mod protocol;
pub mod settings;
pub mod transport;

// Re-exports for convenience
pub use client::{CncLink, DEFAULT_MOTION_TIMEOUT, SessionState};
pub use error::{Error, LineError, Result};
pub use protocol::{
    AxisTarget, Command, LineDecoder, MachineState, MachineStatus, PlaybackProgress,
    parse_progress, parse_status, spindle_ramp,
};
pub use settings::Settings;
pub use transport::{
    Handshake, SerialTransport, Transport,
    serial::{discover, list_ports},
};
