//! sonolib-device: the negotiated device layer.
//!
//! Ties the protocol engine to a concrete generator: per-family command
//! sets as data ([`commands`]), the static compatibility table
//! ([`capability`]), the bootstrap negotiation protocol ([`negotiate`]),
//! the status polling engine ([`status_engine`]), and the [`Device`]
//! surface the UI and the script interpreter consume.
//!
//! Device generations differ in command set and telemetry encoding, not in
//! behavior, so there is a single [`Device`] type holding a selected
//! [`CommandSet`] and [`TelemetryScaling`] value -- no subclass per
//! firmware era.

pub mod builder;
pub mod capability;
pub mod commands;
pub mod device;
pub mod negotiate;
pub mod status_engine;

pub use builder::DeviceBuilder;
pub use capability::{resolve, Capabilities, TelemetryScaling};
pub use commands::{names, CommandDef, CommandSet};
pub use device::Device;
pub use negotiate::{negotiate, scan_identity, Negotiated};
pub use status_engine::{fold_answer, spawn_status_engine, StatusEngineHandle};

use sonolib_core::error::Result;

/// Connect to a generator on a serial port with default settings.
///
/// Shorthand for [`DeviceBuilder::new().port(port).connect()`](DeviceBuilder).
pub async fn connect(port: &str) -> Result<Device> {
    DeviceBuilder::new().port(port).connect().await
}
