//! Command templates and argument encoding.
//!
//! A [`CommandSpec`] describes one firmware command: the message prefix, how
//! its argument is rendered, how long the firmware normally takes to answer,
//! and whether the answer spans multiple lines. Specs are pure data -- they
//! produce byte vectors without performing any I/O, and the negotiated
//! command set decides which specs a given device gets at all.

use std::time::Duration;

use sonolib_core::error::{Error, Result};

/// The newline byte that terminates every command and answer line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// How a command's argument is rendered into the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// The command takes no argument (e.g. the status query `-`).
    None,
    /// A decimal unsigned integer appended to the prefix (e.g. `!f=100000`).
    Unsigned,
    /// Free text appended to the prefix (raw pass-through commands).
    Text,
}

/// A concrete argument value for one command submission.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    None,
    Unsigned(u64),
    Text(String),
}

/// Template for one firmware command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Name the command is looked up under (e.g. `"set_frequency"`).
    pub name: &'static str,
    /// Message prefix as sent on the wire (e.g. `"!f="`).
    pub message: &'static str,
    /// How the argument is rendered.
    pub arg: ArgKind,
    /// How long the firmware normally takes to answer this command.
    ///
    /// Used as the read timeout by the command queue.
    pub response_time: Duration,
    /// Whether the answer spans multiple lines (banners, info dumps).
    pub multiline: bool,
}

impl CommandSpec {
    /// Create a single-line command spec.
    pub fn new(
        name: &'static str,
        message: &'static str,
        arg: ArgKind,
        response_time: Duration,
    ) -> Self {
        CommandSpec {
            name,
            message,
            arg,
            response_time,
            multiline: false,
        }
    }

    /// Mark the answer as multi-line; the queue collects a burst instead of
    /// a single line.
    pub fn multiline(mut self) -> Self {
        self.multiline = true;
        self
    }

    /// Render message + argument + line terminator as ASCII bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when the argument does not match
    /// the spec's [`ArgKind`] or contains non-ASCII text the firmware
    /// cannot read.
    pub fn encode(&self, arg: &CommandArg) -> Result<Vec<u8>> {
        let rendered = match (self.arg, arg) {
            (ArgKind::None, CommandArg::None) => self.message.to_string(),
            (ArgKind::Unsigned, CommandArg::Unsigned(value)) => {
                format!("{}{}", self.message, value)
            }
            (ArgKind::Text, CommandArg::Text(text)) => format!("{}{}", self.message, text),
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "command {} expects {:?} argument, got {:?}",
                    self.name, self.arg, arg
                )));
            }
        };

        if !rendered.is_ascii() {
            return Err(Error::InvalidParameter(format!(
                "command {} rendered non-ASCII text: {rendered:?}",
                self.name
            )));
        }

        let mut bytes = rendered.into_bytes();
        bytes.push(LINE_TERMINATOR);
        Ok(bytes)
    }
}
