//! Protocol definitions for machine communication.
//!
//! This module contains the wire-level protocol pieces:
//! - Command encoding (typed intents to G-code lines)
//! - Line assembly from raw serial reads
//! - Status and progress report decoding

pub mod command;
pub mod line;
pub mod status;

pub use command::{AxisTarget, Command, spindle_ramp};
pub use line::{LineDecoder, MAX_LINE_LEN};
pub use status::{MachineState, MachineStatus, PlaybackProgress, parse_progress, parse_status};
