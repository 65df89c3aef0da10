//! Asynchronous device event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when the
//! connection lifecycle or device telemetry changes. Front ends subscribe to
//! these events for live readouts without polling the engine themselves.

use crate::status::DeviceStatus;

/// An event emitted by a device session.
///
/// Subscribe via the device's `subscribe()` method. Events are delivered on
/// a best-effort basis through a bounded broadcast channel; slow consumers
/// may miss intermediate snapshots under heavy load.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The connection was established and capability negotiation succeeded.
    Connected,

    /// The connection was closed, either deliberately or after an
    /// unrecoverable I/O failure. Fires exactly once per connection.
    Disconnected,

    /// At least one tracked telemetry field changed.
    ///
    /// Carries the full new snapshot; repeated identical polls fire nothing.
    StatusChanged(DeviceStatus),
}
