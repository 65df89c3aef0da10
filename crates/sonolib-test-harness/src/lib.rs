//! sonolib-test-harness: mock transports for protocol-engine tests.
//!
//! Provides [`MockTransport`] (pre-loaded request/answer exchanges with a
//! half-duplex overlap guard) and [`BrokenTransport`] (always-failing link)
//! so the queue, negotiator, status engine, and script interpreter can be
//! tested deterministically without a generator on the bench.

pub mod mock_serial;

pub use mock_serial::{BrokenTransport, MockTransport};
