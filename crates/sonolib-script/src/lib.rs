//! sonolib-script: the automation script engine.
//!
//! A tiny line-based language (`frequency`, `gain`, `on`, `off`, `hold`,
//! bounded/unbounded loops, frequency ramps, raw pass-through) parsed into
//! a closed instruction enum, and a cooperative interpreter that can run to
//! completion, single-step, pause, resume, and cancel mid-dwell.
//!
//! Parsing and execution are strictly separated: a script that violates the
//! grammar (unknown keyword, unbalanced loops) is rejected as a
//! [`ParseError`] before a single instruction runs.

pub mod interpreter;
pub mod parser;

pub use interpreter::{
    Interpreter, InterpreterControl, InterpreterState, ScriptTarget, StepObserver, StepOutcome,
};
pub use parser::{Instruction, ParseError, Script};
