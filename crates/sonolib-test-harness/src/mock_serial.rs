//! Mock transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test command encoding, answer
//! validation, capability negotiation, and the command queue without a
//! generator on the bench.
//!
//! # Example
//!
//! ```
//! use sonolib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // Pre-load: when the engine sends this request, return this answer.
//! mock.expect(b"-\n", b"0#1000000#100#1#1\n");
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use sonolib_core::error::{Error, Result};
use sonolib_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return when the matching request is received.
    response: Vec<u8>,
}

/// A mock [`Transport`] for testing the protocol engine without hardware.
///
/// Two matching modes, usable together:
///
/// - **Ordered expectations** ([`expect`](MockTransport::expect)): consumed
///   strictly in order. A send that does not match the next expectation is
///   an error, which makes out-of-order dispatch visible in tests.
/// - **Stubs** ([`stub`](MockTransport::stub)): request-keyed responses
///   consulted when the expectation queue is empty. Used by concurrency
///   tests where submission order is intentionally nondeterministic.
///
/// The mock also enforces the half-duplex discipline of a real serial
/// device: a `send()` arriving while bytes of the previous response are
/// still unread is reported as an error. This is how the single-flight
/// property of the command queue is asserted.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Request-keyed fallback responses, in effect after `expectations` runs dry.
    stubs: HashMap<Vec<u8>, Vec<u8>>,
    /// The response data pending for the next `receive()` call.
    pending_response: Option<Vec<u8>>,
    /// Cursor into the pending response.
    response_cursor: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Set when a send overlapped an unread response.
    overlap_detected: bool,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            stubs: HashMap::new(),
            pending_response: None,
            response_cursor: 0,
            connected: true,
            sent_log: Vec::new(),
            overlap_detected: false,
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, the subsequent
    /// `receive()` calls will return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Register a reusable stub response for a request.
    ///
    /// Stubs are consulted whenever the ordered expectation queue is empty,
    /// any number of times, in any order.
    pub fn stub(&mut self, request: &[u8], response: &[u8]) {
        self.stubs.insert(request.to_vec(), response.to_vec());
    }

    /// Return a reference to all data that has been sent through this transport.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Whether any `send()` arrived while a previous response was unread.
    pub fn overlap_detected(&self) -> bool {
        self.overlap_detected
    }

    /// Set the connected state of the mock transport.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Half-duplex guard: the previous answer must be fully drained
        // before the next request goes on the wire.
        if self
            .pending_response
            .as_ref()
            .is_some_and(|r| self.response_cursor < r.len())
        {
            self.overlap_detected = true;
            return Err(Error::Protocol(
                "request sent while previous answer was unread".into(),
            ));
        }

        self.sent_log.push(data.to_vec());

        if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            self.pending_response = Some(expectation.response);
            self.response_cursor = 0;
            return Ok(());
        }

        if let Some(response) = self.stubs.get(data) {
            self.pending_response = Some(response.clone());
            self.response_cursor = 0;
            return Ok(());
        }

        Err(Error::Protocol(format!(
            "no expectation or stub for send data {:02X?}",
            data
        )))
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Some(ref response) = self.pending_response {
            let remaining = &response[self.response_cursor..];
            if remaining.is_empty() {
                self.pending_response = None;
                self.response_cursor = 0;
                return Err(Error::Timeout);
            }
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.response_cursor += n;
            if self.response_cursor >= response.len() {
                // All response bytes consumed; clear for next exchange.
                self.pending_response = None;
                self.response_cursor = 0;
            }
            Ok(n)
        } else {
            Err(Error::Timeout)
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending_response = None;
        self.response_cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// A transport whose `send()` always fails with an I/O error.
///
/// Used to test that the command queue treats a dead link as fatal: closes
/// the transport, fires the disconnect notification once, and resolves
/// queued commands with the connection-lost marker.
#[derive(Debug, Default)]
pub struct BrokenTransport {
    closed: bool,
}

impl BrokenTransport {
    /// Create a new broken transport.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for BrokenTransport {
    async fn send(&mut self, _data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "wire cut",
        )))
    }

    async fn receive(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "wire cut",
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}
