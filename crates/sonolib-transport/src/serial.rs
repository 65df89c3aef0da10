//! Serial port transport for ultrasonic generator communication.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for USB virtual COM ports and physical RS-232
//! connections. Generators present as a plain 8N1 line-oriented byte
//! stream, usually at 115200 baud.
//!
//! # Example
//!
//! ```no_run
//! use sonolib_transport::SerialTransport;
//! use sonolib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> sonolib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//! transport.send(b"?type\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(300)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use sonolib_core::error::{Error, Result};
use sonolib_core::transport::Transport;

/// Default baud rate for generators on a USB virtual COM port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port transport.
///
/// Implements the [`Transport`] trait over a [`SerialStream`]. The port is
/// always configured 8N1 with no flow control, which is what every
/// supported generator expects.
#[derive(Debug)]
pub struct SerialTransport {
    /// The underlying serial stream; `None` once closed.
    stream: Option<SerialStream>,
    /// Port path, kept for diagnostics.
    port: String,
}

impl SerialTransport {
    /// Open a serial port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the port cannot be opened (wrong
    /// path, busy, no permission).
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::Connection(format!("cannot open {port}: {e}")))?;

        debug!(port, baud_rate, "serial port opened");
        Ok(SerialTransport {
            stream: Some(stream),
            port: port.to_string(),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => Err(Error::ConnectionLost),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!(port = %self.port, "serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
