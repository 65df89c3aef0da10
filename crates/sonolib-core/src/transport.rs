//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the physical link to an ultrasonic
//! generator. Implementations exist for serial ports (`sonolib-transport`)
//! and mock transports for testing (`sonolib-test-harness`).
//!
//! The protocol engine in `sonolib-protocol` operates on a `Transport` rather
//! than directly on a serial port, enabling both real hardware control and
//! deterministic unit testing with `MockTransport`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to an ultrasonic generator.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Line framing and request/answer correlation are handled by the
/// protocol engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations should block until all bytes have been handed to the
    /// underlying link (serial TX buffer, pipe, etc.).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
