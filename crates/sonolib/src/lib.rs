//! # sonolib -- Async Control for Ultrasonic Generators
//!
//! `sonolib` is an asynchronous Rust library for driving ultrasonic
//! generator instruments over their serial link: set frequency and gain,
//! toggle the output signal, stream live telemetry, and run small
//! automation scripts. It is built for lab tooling and production-line
//! automation where a flaky half-duplex serial line must never take the
//! controller down.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonolib::{connect, DeviceEvent};
//!
//! #[tokio::main]
//! async fn main() -> sonolib::Result<()> {
//!     let device = connect("/dev/ttyUSB0").await?;
//!     println!(
//!         "connected: {} firmware {}",
//!         device.info().family,
//!         device.info().firmware
//!     );
//!
//!     device.set_frequency(1_000_000).await?;
//!     device.signal_on().await?;
//!
//!     let mut events = device.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::StatusChanged(status) = event {
//!             println!("{} Hz, {} V", status.frequency, status.urms);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                  | Purpose                                            |
//! |------------------------|----------------------------------------------------|
//! | `sonolib-core`         | Traits, status/identity types, events, errors      |
//! | `sonolib-transport`    | Serial transport over tokio-serial                 |
//! | `sonolib-protocol`     | Command/answer model, line framing, command queue  |
//! | `sonolib-device`       | Capability negotiation, command sets, status engine|
//! | `sonolib-script`       | Automation script parser and interpreter           |
//! | `sonolib-test-harness` | Mock transports for deterministic tests            |
//! | **`sonolib`**          | This facade crate -- re-exports everything         |
//!
//! ## The single-flight discipline
//!
//! The wire offers no request IDs, so all protocol activity -- ad-hoc
//! commands, status polls, script instructions -- funnels through one
//! strictly-ordered command queue with at most one outstanding request.
//! Timeouts and garbled lines degrade to invalid [`Answer`]s; only a dead
//! link is an error.
//!
//! ## Scripts
//!
//! ```no_run
//! use sonolib::{connect, Interpreter, Script};
//! use std::sync::Arc;
//!
//! # async fn example() -> sonolib::Result<()> {
//! let device = Arc::new(connect("/dev/ttyUSB0").await?);
//! let script = Script::parse("frequency 100000\nstartloop 3\non\nhold 500ms\noff\nendloop")
//!     .map_err(|e| sonolib::Error::InvalidParameter(e.to_string()))?;
//!
//! let mut interpreter = Interpreter::new(script, device.clone());
//! interpreter.run().await?;
//! # Ok(())
//! # }
//! ```

pub use sonolib_core::*;

pub use sonolib_device::{
    connect, names, Capabilities, CommandDef, CommandSet, Device, DeviceBuilder, TelemetryScaling,
};
pub use sonolib_protocol::{
    Answer, AnswerValidator, ArgKind, CommandArg, CommandSpec, FieldKind, FieldMap, FieldValue,
    Reply,
};
pub use sonolib_script::{
    Instruction, Interpreter, InterpreterControl, InterpreterState, ParseError, Script,
    ScriptTarget, StepOutcome,
};
pub use sonolib_transport::SerialTransport;

/// Lower-level building blocks for callers that assemble their own stack.
pub mod protocol {
    pub use sonolib_protocol::*;
}

/// Device-layer internals: negotiation, command sets, the status engine.
pub mod device {
    pub use sonolib_device::*;
}
