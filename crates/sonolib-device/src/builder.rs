//! DeviceBuilder -- fluent configuration for establishing a connection.
//!
//! Separates configuration (port, baud, timing) from the connect sequence
//! so callers can tune polling and negotiation windows before the port is
//! touched.
//!
//! # Example
//!
//! ```no_run
//! use sonolib_device::DeviceBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> sonolib_core::Result<()> {
//! let device = DeviceBuilder::new()
//!     .port("/dev/ttyUSB0")
//!     .poll_interval(Duration::from_millis(150))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};

use sonolib_core::error::{Error, Result};
use sonolib_core::events::DeviceEvent;
use sonolib_core::status::DeviceStatus;
use sonolib_core::transport::Transport;
use sonolib_protocol::{spawn_queue, LineIo};
use sonolib_transport::{SerialTransport, DEFAULT_BAUD_RATE};

use crate::device::Device;
use crate::negotiate::negotiate;
use crate::status_engine::spawn_status_engine;

/// Fluent builder for a [`Device`] connection.
pub struct DeviceBuilder {
    port: Option<String>,
    baud_rate: u32,
    /// Window for collecting the greeting banner after the handshake.
    banner_window: Duration,
    /// Fixed delay between status polls.
    poll_interval: Duration,
}

impl DeviceBuilder {
    /// Create a builder with defaults appropriate for USB-attached
    /// generators.
    pub fn new() -> Self {
        DeviceBuilder {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            banner_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn port(mut self, port: &str) -> Self {
        self.port = Some(port.to_string());
        self
    }

    /// Override the default baud rate.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the greeting-burst collection window (default: 500 ms).
    pub fn banner_window(mut self, window: Duration) -> Self {
        self.banner_window = window;
        self
    }

    /// Set the inter-poll delay of the status engine (default: 100 ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open the serial port, negotiate capabilities, and start the status
    /// engine.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] when the port cannot be opened,
    /// [`Error::UnsupportedDevice`] when negotiation finds no compatible
    /// command set (the connection is torn down first).
    pub async fn connect(self) -> Result<Device> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("port is required for connect()".into()))?;
        let transport = SerialTransport::open(port, self.baud_rate).await?;
        self.connect_with_transport(Box::new(transport)).await
    }

    /// Negotiate over a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a `MockTransport`
    /// from `sonolib-test-harness`) and for callers that manage the
    /// transport lifecycle themselves.
    pub async fn connect_with_transport(self, transport: Box<dyn Transport>) -> Result<Device> {
        let (event_tx, _) = broadcast::channel(64);
        let queue = spawn_queue(LineIo::new(transport), event_tx.clone());
        let handle = queue.handle();

        let negotiated = match negotiate(&handle, self.banner_window).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                // No best-effort fallback: tear the connection down.
                let _ = queue.shutdown().await;
                return Err(e);
            }
        };

        let capabilities = Arc::new(negotiated.capabilities);
        let status = Arc::new(RwLock::new(DeviceStatus::default()));
        let engine = spawn_status_engine(
            handle.clone(),
            capabilities.clone(),
            status.clone(),
            event_tx.clone(),
            self.poll_interval,
        );

        let _ = event_tx.send(DeviceEvent::Connected);

        Ok(Device {
            info: negotiated.info,
            capabilities,
            queue: Mutex::new(Some(queue)),
            handle,
            status,
            event_tx,
            status_engine: Mutex::new(Some(engine)),
        })
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
