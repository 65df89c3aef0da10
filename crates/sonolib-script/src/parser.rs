//! Script text parsing.
//!
//! Scripts are one instruction per line. `#` starts a comment; blank lines
//! are skipped. Instruction kinds are a closed enum matched exhaustively,
//! so an unknown keyword is rejected at parse time and can never surface
//! as a runtime failure.
//!
//! ```text
//! # sweep the transducer, then clean up
//! frequency 100000
//! gain 80
//! startloop 3
//! on
//! hold 500ms
//! off
//! endloop
//! ramp_freq 100000 200000 10000 100ms
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One decoded script instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Set the output frequency in hertz.
    Frequency(u64),
    /// Set the gain in percent.
    Gain(u64),
    /// Switch the output signal on.
    On,
    /// Switch the output signal off.
    Off,
    /// Do nothing for a while.
    Hold(Duration),
    /// Step the frequency from `start` to `stop` (inclusive), dwelling
    /// `hold` per increment.
    RampFreq {
        start: u64,
        stop: u64,
        step: u64,
        hold: Duration,
    },
    /// Begin a loop; `None` means unbounded.
    StartLoop { times: Option<u32> },
    /// End of the innermost open loop.
    EndLoop,
    /// Pass a line through to the device untouched.
    Raw(String),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Frequency(hz) => write!(f, "set frequency to {hz} Hz"),
            Instruction::Gain(percent) => write!(f, "set gain to {percent} %"),
            Instruction::On => write!(f, "switch signal on"),
            Instruction::Off => write!(f, "switch signal off"),
            Instruction::Hold(d) => write!(f, "hold {} ms", d.as_millis()),
            Instruction::RampFreq {
                start, stop, step, ..
            } => write!(f, "ramp frequency {start} Hz to {stop} Hz in {step} Hz steps"),
            Instruction::StartLoop { times: Some(n) } => write!(f, "loop {n} times"),
            Instruction::StartLoop { times: None } => write!(f, "loop until cancelled"),
            Instruction::EndLoop => write!(f, "end of loop"),
            Instruction::Raw(line) => write!(f, "send {line:?}"),
        }
    }
}

/// Script text that violates the grammar. Nothing executes when parsing fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("script parse error at line {line}: {message}")]
pub struct ParseError {
    /// 1-based source line number.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// A parsed script: decoded instructions plus the loop table.
#[derive(Debug, Clone)]
pub struct Script {
    instructions: Vec<Instruction>,
    /// Maps each `startloop` instruction index to its matching `endloop`
    /// index (always strictly greater).
    loop_table: BTreeMap<usize, usize>,
}

impl Script {
    /// Parse script text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] on an unknown keyword, a malformed argument,
    /// or unbalanced `startloop`/`endloop` pairs.
    pub fn parse(text: &str) -> Result<Script, ParseError> {
        let mut instructions = Vec::new();
        let mut loop_table = BTreeMap::new();
        // Open startloops: (instruction index, source line) for error reporting.
        let mut open_loops: Vec<(usize, usize)> = Vec::new();

        for (lineno, raw_line) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let instruction = if line.starts_with('!') || line.starts_with('?') {
                Instruction::Raw(line.to_string())
            } else {
                parse_keyword_line(lineno, line)?
            };

            match &instruction {
                Instruction::StartLoop { .. } => {
                    open_loops.push((instructions.len(), lineno));
                }
                Instruction::EndLoop => {
                    let (start, _) = open_loops.pop().ok_or_else(|| {
                        ParseError::new(lineno, "endloop without matching startloop")
                    })?;
                    loop_table.insert(start, instructions.len());
                }
                _ => {}
            }

            instructions.push(instruction);
        }

        if let Some((_, lineno)) = open_loops.pop() {
            return Err(ParseError::new(lineno, "startloop without matching endloop"));
        }

        Ok(Script {
            instructions,
            loop_table,
        })
    }

    /// The decoded instructions in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the script holds no instructions at all.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The `startloop` -> `endloop` index table.
    pub fn loop_table(&self) -> &BTreeMap<usize, usize> {
        &self.loop_table
    }

    /// The `endloop` index matching a `startloop` index.
    pub fn loop_end_of(&self, start: usize) -> Option<usize> {
        self.loop_table.get(&start).copied()
    }

    /// The `startloop` index matching an `endloop` index.
    pub fn loop_start_of(&self, end: usize) -> Option<usize> {
        self.loop_table
            .iter()
            .find(|(_, &e)| e == end)
            .map(|(&s, _)| s)
    }
}

/// Parse one keyword-form line into an instruction.
fn parse_keyword_line(lineno: usize, line: &str) -> Result<Instruction, ParseError> {
    let mut tokens = line.split_whitespace();
    let keyword = tokens.next().expect("line is non-empty");
    let args: Vec<&str> = tokens.collect();

    match keyword.to_ascii_lowercase().as_str() {
        "frequency" => Ok(Instruction::Frequency(parse_unsigned(
            lineno,
            one_arg(lineno, "frequency", &args)?,
        )?)),
        "gain" => Ok(Instruction::Gain(parse_unsigned(
            lineno,
            one_arg(lineno, "gain", &args)?,
        )?)),
        "on" => {
            no_args(lineno, "on", &args)?;
            Ok(Instruction::On)
        }
        "off" => {
            no_args(lineno, "off", &args)?;
            Ok(Instruction::Off)
        }
        "hold" => Ok(Instruction::Hold(parse_duration(
            lineno,
            one_arg(lineno, "hold", &args)?,
        )?)),
        "ramp_freq" => {
            if args.len() < 3 || args.len() > 4 {
                return Err(ParseError::new(
                    lineno,
                    "ramp_freq takes start, stop, step and an optional hold",
                ));
            }
            let start = parse_unsigned(lineno, args[0])?;
            let stop = parse_unsigned(lineno, args[1])?;
            let step = parse_unsigned(lineno, args[2])?;
            if step == 0 {
                return Err(ParseError::new(lineno, "ramp_freq step must be nonzero"));
            }
            let hold = match args.get(3) {
                Some(arg) => parse_duration(lineno, arg)?,
                None => Duration::from_millis(100),
            };
            Ok(Instruction::RampFreq {
                start,
                stop,
                step,
                hold,
            })
        }
        "startloop" => {
            let times = match args.len() {
                0 => None,
                1 => Some(
                    args[0].parse::<u32>().map_err(|_| {
                        ParseError::new(lineno, format!("bad loop count {:?}", args[0]))
                    })?,
                ),
                _ => {
                    return Err(ParseError::new(
                        lineno,
                        "startloop takes at most one argument",
                    ));
                }
            };
            Ok(Instruction::StartLoop { times })
        }
        "endloop" => {
            no_args(lineno, "endloop", &args)?;
            Ok(Instruction::EndLoop)
        }
        other => Err(ParseError::new(
            lineno,
            format!("unknown instruction {other:?}"),
        )),
    }
}

fn one_arg<'a>(lineno: usize, keyword: &str, args: &[&'a str]) -> Result<&'a str, ParseError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(ParseError::new(
            lineno,
            format!("{keyword} takes exactly one argument"),
        )),
    }
}

fn no_args(lineno: usize, keyword: &str, args: &[&str]) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::new(
            lineno,
            format!("{keyword} takes no argument"),
        ))
    }
}

fn parse_unsigned(lineno: usize, arg: &str) -> Result<u64, ParseError> {
    arg.parse::<u64>()
        .map_err(|_| ParseError::new(lineno, format!("bad number {arg:?}")))
}

/// Parse a hold duration: `500ms`, `2s`, `1.5s`, or a bare millisecond count.
fn parse_duration(lineno: usize, arg: &str) -> Result<Duration, ParseError> {
    let bad = || ParseError::new(lineno, format!("bad duration {arg:?}"));

    if let Some(stripped) = arg.strip_suffix("ms") {
        let ms = stripped.parse::<u64>().map_err(|_| bad())?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = arg.strip_suffix('s') {
        let secs = stripped.parse::<f64>().map_err(|_| bad())?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(bad());
        }
        Ok(Duration::from_millis((secs * 1000.0).round() as u64))
    } else {
        let ms = arg.parse::<u64>().map_err(|_| bad())?;
        Ok(Duration::from_millis(ms))
    }
}
