//! Error types for the cnclink library.

use thiserror::Error;

/// The main error type for cnclink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line assembly error.
    #[error("line error: {0}")]
    Line(#[from] LineError),

    /// Handshake probe got no matching reply from the device.
    #[error("handshake failed: expected reply containing {expected:?}")]
    Handshake { expected: String },

    /// Wait loop deadline expired before the machine reached the wanted state.
    #[error("machine did not reach the expected state within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Session is not connected, or was invalidated by a transport failure.
    #[error("not connected")]
    NotConnected,

    /// No parseable status report was available where one was required.
    #[error("no parseable status report from the machine")]
    StatusUnavailable,

    /// A sequence was started before the required calibration was performed.
    #[error("calibration required: {parameter} has not been set")]
    CalibrationRequired { parameter: &'static str },
}

/// Line-assembly specific errors.
#[derive(Debug, Error)]
pub enum LineError {
    /// A reply line exceeded the maximum accepted length.
    #[error("line too long: {size} bytes exceeds maximum {max}")]
    TooLong { size: usize, max: usize },
}

/// Result type alias for cnclink operations.
pub type Result<T> = std::result::Result<T, Error>;
