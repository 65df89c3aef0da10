//! sonolib-core: Core traits, types, and error definitions for sonolib.
//!
//! This crate defines the device-agnostic abstractions the rest of the
//! workspace builds on. Front ends and automation tools depend on these
//! types without pulling in the protocol engine or a serial backend.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`DeviceEvent`] -- connection lifecycle and telemetry notifications
//! - [`DeviceStatus`] -- one atomic telemetry snapshot
//! - [`DeviceInfo`] -- identity established by capability negotiation
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod status;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use sonolib_core::*`.
pub use error::{Error, Result};
pub use events::DeviceEvent;
pub use status::{DeviceStatus, RelayMode, MAX_FREQUENCY_HZ, MAX_GAIN_PERCENT};
pub use transport::Transport;
pub use types::{DeviceFamily, DeviceInfo, DeviceModules, FirmwareVersion};
