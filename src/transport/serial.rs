//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for G-code controllers
//! connected via USB, plus discovery of candidate ports.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::protocol::LineDecoder;
use crate::transport::{Handshake, Transport};

/// Default baud rate for the supported controllers.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Default bound on a single reply-line read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default delay after opening the port before the first command.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/tty.usbmodem1432" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Bound on a single reply-line read.
    pub read_timeout: Duration,
    /// Delay after opening the port before the first command.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for machine communication.
pub struct SerialTransport {
    config: SerialConfig,
    stream: Option<SerialStream>,
    decoder: LineDecoder,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
            decoder: LineDecoder::new(),
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// The configured port path.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.config.port
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            tracing::info!("connecting to serial port: {}", self.config.port);

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Let the controller finish its USB enumeration chatter.
            tokio::time::sleep(self.config.connection_delay).await;

            self.stream = Some(stream);
            self.decoder.clear();

            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.take().is_some() {
                tracing::info!("disconnected from serial port: {}", self.config.port);
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

            tracing::trace!("sending {} bytes", data.len());
            stream.write_all(&data).await.map_err(Error::Io)?;
            stream.flush().await.map_err(Error::Io)?;

            Ok(())
        })
    }

    fn read_line(&mut self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            if self.stream.is_none() {
                return Err(Error::NotConnected);
            }

            let deadline = tokio::time::Instant::now() + self.config.read_timeout;
            let mut buf = [0u8; 256];

            loop {
                match self.decoder.next_line() {
                    Ok(Some(line)) => {
                        tracing::trace!("received line: {line:?}");
                        return Ok(line);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // The decoder resynchronized; keep reading until the
                        // timeout and let the caller see an empty line.
                        tracing::warn!("line decode error: {e}");
                    }
                }

                let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
                match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
                    Ok(Ok(0)) => {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "serial port closed",
                        )));
                    }
                    Ok(Ok(n)) => self.decoder.feed(&buf[..n]),
                    Ok(Err(e)) => return Err(Error::Io(e)),
                    // Timeout: an empty line, which decodes to the sentinel.
                    Err(_) => return Ok(String::new()),
                }
            }
        })
    }

    fn drain(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.decoder.clear();
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::NotConnected);
            };

            let mut buf = [0u8; 256];
            let mut drained = 0usize;
            while let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_millis(10), stream.read(&mut buf)).await
            {
                if n == 0 {
                    break;
                }
                drained += n;
            }

            if drained > 0 {
                tracing::debug!("drained {drained} stale bytes");
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Runs a handshake probe over an open transport.
///
/// Writes the query, reads one line, and returns true iff the reply contains
/// the expected substring. Transport failures during the probe count as a
/// non-match rather than propagating.
pub async fn probe<T: Transport + ?Sized>(transport: &mut T, handshake: &Handshake) -> bool {
    if transport.drain().await.is_err() {
        return false;
    }
    if transport.send(handshake.query.clone()).await.is_err() {
        return false;
    }
    match transport.read_line().await {
        Ok(line) => line.contains(&handshake.expect),
        Err(_) => false,
    }
}

/// Scans serial ports whose name contains `filter` and returns those that
/// answer the handshake probe.
///
/// Every candidate is opened, probed, and closed again before the next is
/// tried; discovery never holds a connection open. With no handshake,
/// opening successfully is enough to qualify. Candidates that fail to open
/// are skipped; absence from the result set is the only signal.
pub async fn discover(filter: &str, handshake: Option<&Handshake>) -> Result<Vec<String>> {
    let mut found = Vec::new();

    for port in list_ports()?.into_iter().filter(|p| p.contains(filter)) {
        let mut transport = SerialTransport::with_port(&port);
        if let Err(e) = transport.connect().await {
            tracing::debug!("skipping {port}: {e}");
            continue;
        }

        let accepted = match handshake {
            Some(handshake) => probe(&mut transport, handshake).await,
            None => true,
        };

        let _ = transport.disconnect().await;
        if accepted {
            tracing::debug!("discovered {port}");
            found.push(port);
        }
    }

    Ok(found)
}
