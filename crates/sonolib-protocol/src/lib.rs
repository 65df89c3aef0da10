//! sonolib-protocol: the device-communication protocol engine.
//!
//! Implements the command/answer model and the single-flight command queue
//! that everything else drives the device through:
//!
//! - [`command`] -- command templates and argument encoding
//! - [`answer`] -- pattern-based answer validation into typed field maps
//! - [`line`] -- line framing (read-with-timeout, burst reads) over a
//!   byte [`Transport`](sonolib_core::Transport)
//! - [`queue`] -- the strictly-ordered worker that serializes commands onto
//!   the wire and routes replies back to waiting callers
//!
//! The engine is deliberately tolerant: garbled, partial, and empty answer
//! lines degrade to invalid [`Answer`]s instead of errors, because serial
//! noise is routine and must never take down a polling loop.

pub mod answer;
pub mod command;
pub mod line;
pub mod queue;

pub use answer::{field, validate, Answer, AnswerValidator, FieldKind, FieldMap, FieldSpec, FieldValue};
pub use command::{ArgKind, CommandArg, CommandSpec, LINE_TERMINATOR};
pub use line::LineIo;
pub use queue::{spawn_queue, CommandQueue, Exchange, QueueHandle, Reply};
