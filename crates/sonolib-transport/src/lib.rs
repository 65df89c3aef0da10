//! sonolib-transport: physical-link implementations for sonolib.
//!
//! Currently one backend: [`SerialTransport`] over tokio-serial, which is
//! how every supported generator connects. The protocol engine only sees
//! the [`Transport`](sonolib_core::Transport) trait, so tests substitute
//! the mock transport from `sonolib-test-harness`.

pub mod serial;

pub use serial::{SerialTransport, DEFAULT_BAUD_RATE};
