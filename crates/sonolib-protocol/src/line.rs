//! Line framing over a byte [`Transport`].
//!
//! [`LineIo`] owns the transport and an accumulation buffer, exposing the
//! line-oriented contract the rest of the engine is written against:
//! write a terminated line, read one line with a deadline, or collect a
//! burst of lines inside a fixed window (device banners and other verbose
//! answers arrive as bursts).
//!
//! Blank lines are swallowed here -- they are routine link noise between
//! answers, never answers themselves.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use sonolib_core::error::{Error, Result};
use sonolib_core::transport::Transport;

use crate::command::LINE_TERMINATOR;

/// Maximum accumulation buffer size before reset to prevent unbounded
/// growth. Answer lines are typically under 64 bytes; 8192 is generous
/// headroom.
const MAX_BUF: usize = 8192;

/// Read chunk size per transport receive call.
const READ_CHUNK: usize = 256;

/// Line reader/writer over a byte transport.
pub struct LineIo {
    transport: Box<dyn Transport>,
    buf: Vec<u8>,
}

impl LineIo {
    /// Wrap a transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        LineIo {
            transport,
            buf: Vec::new(),
        }
    }

    /// Send one line. A missing terminator is appended.
    pub async fn write_line(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.last() == Some(&LINE_TERMINATOR) {
            self.transport.send(bytes).await
        } else {
            let mut terminated = Vec::with_capacity(bytes.len() + 1);
            terminated.extend_from_slice(bytes);
            terminated.push(LINE_TERMINATOR);
            self.transport.send(&terminated).await
        }
    }

    /// Read the next non-blank line, waiting up to `timeout`.
    ///
    /// Carriage returns are stripped; non-UTF-8 bytes are replaced rather
    /// than rejected, since garbled output must not crash anything.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.pop_line() {
                return Ok(line);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            self.fill(deadline - now).await?;
        }
    }

    /// Collect every line arriving within `window`.
    ///
    /// Returns what arrived (possibly nothing); the window elapsing is not
    /// an error. Transport failures other than timeout propagate.
    pub async fn read_burst(&mut self, window: Duration) -> Result<Vec<String>> {
        let deadline = Instant::now() + window;
        let mut lines = Vec::new();
        loop {
            while let Some(line) = self.pop_line() {
                lines.push(line);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.fill(deadline - now).await {
                Ok(()) => {}
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(lines)
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Whether the underlying transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Recover the transport, dropping any buffered bytes.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    /// Receive one chunk into the accumulation buffer.
    async fn fill(&mut self, timeout: Duration) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.transport.receive(&mut chunk, timeout).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        if self.buf.len() > MAX_BUF {
            warn!(len = self.buf.len(), "line buffer overflow, resetting");
            self.buf.clear();
        }
        Ok(())
    }

    /// Pop the next complete non-blank line from the buffer.
    fn pop_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == LINE_TERMINATOR) {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let trimmed = text.trim_end_matches('\r');
            if !trimmed.trim().is_empty() {
                return Some(trimmed.to_string());
            }
        }
        None
    }
}
