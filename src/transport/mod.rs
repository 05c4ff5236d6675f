//! Transport layer for machine communication.
//!
//! This module provides the abstraction for different transport methods.
//! Currently only USB/Serial is implemented.

pub mod serial;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

/// Trait for transport implementations.
///
/// A transport is a byte-stream to one device: exclusive, line-oriented on
/// the read side, with a bounded read timeout configured at construction.
pub trait Transport: Send + Sync {
    /// Connects to the device.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Sends raw bytes to the device.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Reads one reply line, bounded by the transport's read timeout.
    ///
    /// Returns an empty string if the device sent no complete line before
    /// the timeout; the status decoder turns that into the sentinel record.
    fn read_line(&mut self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Discards any unread input so the next read starts fresh.
    fn drain(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// A query/expected-response pair used to confirm the device on the other
/// end of a transport is the expected controller.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Bytes written to the device.
    pub query: Bytes,
    /// Substring the reply line must contain.
    pub expect: String,
}

impl Handshake {
    /// The stock probe: a bare newline the controller answers with `ok`.
    #[must_use]
    pub fn ok_probe() -> Self {
        Self {
            query: Bytes::from_static(b"\n"),
            expect: "ok".into(),
        }
    }
}

pub use serial::SerialTransport;
