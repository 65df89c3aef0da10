//! The cooperative script interpreter.
//!
//! An explicit resumable state machine rather than generator magic: the
//! execution unit is one [`step`](Interpreter::step), which the UI can call
//! per tick or per single-step button press, and [`run`](Interpreter::run)
//! simply drives steps to completion. Pause and cancellation are first-class
//! operations checked between units; a `hold` sleeps in bounded slices so
//! neither ever waits for a full dwell.
//!
//! Loop bodies keep their runtime state (loop counters, ramp progress,
//! partial holds) in per-line tables owned by the interpreter. Reaching an
//! `endloop` clears those tables for every line inside the loop body before
//! jumping back, so ramps consumed during the previous pass start over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use sonolib_core::error::{Error, Result};

use crate::parser::{Instruction, Script};

/// Upper bound on one uninterruptible sleep slice.
const HOLD_SLICE: Duration = Duration::from_millis(50);

/// The device operations a script can drive.
///
/// `sonolib-device` implements this for a connected generator; tests
/// implement it with a recording stub.
#[async_trait]
pub trait ScriptTarget: Send + Sync {
    /// Set the output frequency in hertz.
    async fn set_frequency(&self, hz: u64) -> Result<()>;
    /// Set the gain in percent.
    async fn set_gain(&self, percent: u64) -> Result<()>;
    /// Switch the output signal on.
    async fn signal_on(&self) -> Result<()>;
    /// Switch the output signal off.
    async fn signal_off(&self) -> Result<()>;
    /// Send a raw command line.
    async fn send_raw(&self, line: &str) -> Result<()>;
}

/// Interpreter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    /// Not executing; the cursor is at the start.
    Ready,
    /// Inside [`Interpreter::run`] or [`Interpreter::step`].
    Running,
    /// Stopped between units; resumable.
    Paused,
}

/// What one [`Interpreter::step`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One unit executed; more remain.
    Progressed,
    /// The script completed (or was cancelled).
    Finished,
}

/// Cloneable pause/cancel handle, usable while the interpreter is running.
#[derive(Debug, Clone, Default)]
pub struct InterpreterControl {
    pause: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl InterpreterControl {
    /// Request a pause; takes effect after the current unit.
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Request cancellation; execution stops after the current unit and the
    /// interpreter resets to [`InterpreterState::Ready`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::SeqCst)
    }

    fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }
}

/// Per-step observer: `(instruction index, human-readable task)`.
pub type StepObserver = Box<dyn Fn(usize, String) + Send + Sync>;

/// The resumable script executor.
pub struct Interpreter {
    script: Script,
    target: Arc<dyn ScriptTarget>,
    cursor: usize,
    state: InterpreterState,
    finished: bool,
    /// Remaining iterations per bounded `startloop` line.
    loop_remaining: HashMap<usize, u32>,
    /// Current value per in-progress `ramp_freq` line.
    ramp_progress: HashMap<usize, u64>,
    /// Remaining dwell per interrupted `hold` line.
    hold_remaining: HashMap<usize, Duration>,
    control: InterpreterControl,
    on_step: Option<StepObserver>,
}

impl Interpreter {
    /// Create an interpreter for a parsed script.
    pub fn new(script: Script, target: Arc<dyn ScriptTarget>) -> Self {
        Interpreter {
            script,
            target,
            cursor: 0,
            state: InterpreterState::Ready,
            finished: false,
            loop_remaining: HashMap::new(),
            ramp_progress: HashMap::new(),
            hold_remaining: HashMap::new(),
            control: InterpreterControl::default(),
            on_step: None,
        }
    }

    /// Register a per-step observer.
    pub fn with_observer(mut self, observer: StepObserver) -> Self {
        self.on_step = Some(observer);
        self
    }

    /// A cloneable pause/cancel handle.
    pub fn control(&self) -> InterpreterControl {
        self.control.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// Index of the instruction the cursor is at.
    pub fn current_line(&self) -> usize {
        self.cursor
    }

    /// Whether the last run reached natural completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drive the script until completion, pause, cancellation, or an
    /// instruction failure.
    ///
    /// Returns the state the interpreter settled in. An instruction whose
    /// underlying device call fails leaves the interpreter [`Paused`] at
    /// that instruction and returns the error; resuming retries it.
    ///
    /// [`Paused`]: InterpreterState::Paused
    pub async fn run(&mut self) -> Result<InterpreterState> {
        if self.state == InterpreterState::Running {
            return Err(Error::InvalidParameter("script is already running".into()));
        }
        self.finished = false;
        self.state = InterpreterState::Running;

        loop {
            // Keep the loop cooperative even when every instruction in a
            // pass completes without awaiting.
            tokio::task::yield_now().await;

            if self.control.take_cancel() {
                debug!("script cancelled");
                self.reset();
                return Ok(self.state);
            }
            if self.control.take_pause() {
                self.state = InterpreterState::Paused;
                return Ok(self.state);
            }
            if self.cursor >= self.script.len() {
                self.finished = true;
                self.reset();
                return Ok(self.state);
            }
            if let Err(e) = self.execute_unit().await {
                self.state = InterpreterState::Paused;
                return Err(e);
            }
        }
    }

    /// Resume a paused script.
    ///
    /// Equivalent to [`run`](Interpreter::run), but insists on the
    /// [`Paused`](InterpreterState::Paused) state so accidental restarts of
    /// a finished script surface as errors.
    pub async fn resume(&mut self) -> Result<InterpreterState> {
        if self.state != InterpreterState::Paused {
            return Err(Error::InvalidParameter("script is not paused".into()));
        }
        self.run().await
    }

    /// Execute exactly one unit (single-step).
    ///
    /// A unit is one instruction, except that an in-progress ramp advances
    /// one increment per call. Not callable while [`run`](Interpreter::run)
    /// is driving the script.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.state == InterpreterState::Running {
            return Err(Error::InvalidParameter("script is already running".into()));
        }
        if self.control.take_cancel() {
            self.reset();
            return Ok(StepOutcome::Finished);
        }
        // A single step is an explicit request for one unit; a stale pause
        // request must not turn it into a no-op.
        self.control.take_pause();
        if self.cursor >= self.script.len() {
            self.finished = true;
            self.reset();
            return Ok(StepOutcome::Finished);
        }

        self.state = InterpreterState::Running;
        let result = self.execute_unit().await;
        match result {
            Ok(()) => {
                if self.cursor >= self.script.len() {
                    self.finished = true;
                    self.reset();
                    Ok(StepOutcome::Finished)
                } else {
                    self.state = InterpreterState::Paused;
                    Ok(StepOutcome::Progressed)
                }
            }
            Err(e) => {
                self.state = InterpreterState::Paused;
                Err(e)
            }
        }
    }

    /// Back to `Ready`: cursor at the start, all runtime state cleared.
    fn reset(&mut self) {
        self.cursor = 0;
        self.loop_remaining.clear();
        self.ramp_progress.clear();
        self.hold_remaining.clear();
        self.control.take_pause();
        self.control.take_cancel();
        self.state = InterpreterState::Ready;
    }

    /// Execute the unit at the cursor.
    async fn execute_unit(&mut self) -> Result<()> {
        let idx = self.cursor;
        let instruction = self.script.instructions()[idx].clone();
        if let Some(observer) = &self.on_step {
            observer(idx, instruction.to_string());
        }

        match instruction {
            Instruction::Frequency(hz) => {
                self.target.set_frequency(hz).await?;
                self.cursor += 1;
            }
            Instruction::Gain(percent) => {
                self.target.set_gain(percent).await?;
                self.cursor += 1;
            }
            Instruction::On => {
                self.target.signal_on().await?;
                self.cursor += 1;
            }
            Instruction::Off => {
                self.target.signal_off().await?;
                self.cursor += 1;
            }
            Instruction::Raw(line) => {
                self.target.send_raw(&line).await?;
                self.cursor += 1;
            }
            Instruction::Hold(total) => {
                if self.sleep_held(idx, total).await {
                    self.hold_remaining.remove(&idx);
                    self.cursor += 1;
                }
            }
            Instruction::RampFreq {
                start,
                stop,
                step,
                hold,
            } => {
                let current = *self.ramp_progress.entry(idx).or_insert(start);
                self.target.set_frequency(current).await?;
                self.sleep_interruptible(hold).await;
                match next_ramp_value(current, start, stop, step) {
                    Some(next) => {
                        self.ramp_progress.insert(idx, next);
                    }
                    None => {
                        self.ramp_progress.remove(&idx);
                        self.cursor += 1;
                    }
                }
            }
            Instruction::StartLoop { times } => match times {
                None => {
                    self.cursor += 1;
                }
                Some(n) => {
                    let remaining = self.loop_remaining.entry(idx).or_insert(n);
                    if *remaining > 0 {
                        *remaining -= 1;
                        self.cursor += 1;
                    } else {
                        self.loop_remaining.remove(&idx);
                        let end = self.script.loop_end_of(idx).ok_or_else(|| {
                            Error::Protocol("loop table missing startloop entry".into())
                        })?;
                        self.cursor = end + 1;
                    }
                }
            },
            Instruction::EndLoop => {
                let start = self.script.loop_start_of(idx).ok_or_else(|| {
                    Error::Protocol("loop table missing endloop entry".into())
                })?;
                // Restore the loop body to its pre-pass form.
                for inner in (start + 1)..idx {
                    self.loop_remaining.remove(&inner);
                    self.ramp_progress.remove(&inner);
                    self.hold_remaining.remove(&inner);
                }
                self.cursor = start;
            }
        }
        Ok(())
    }

    /// Sleep out a `hold`, slice by slice. Returns `true` when the dwell
    /// completed; on pause/cancel the remainder is saved and the cursor
    /// stays put.
    async fn sleep_held(&mut self, idx: usize, total: Duration) -> bool {
        let mut remaining = self.hold_remaining.get(&idx).copied().unwrap_or(total);
        loop {
            if remaining.is_zero() {
                return true;
            }
            if self.control.cancel_requested() || self.control.pause_requested() {
                self.hold_remaining.insert(idx, remaining);
                return false;
            }
            let slice = remaining.min(HOLD_SLICE);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }

    /// Sleep a ramp dwell, returning early on pause/cancel.
    async fn sleep_interruptible(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.control.cancel_requested() || self.control.pause_requested() {
                return;
            }
            let slice = remaining.min(HOLD_SLICE);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }
}

/// The next ramp value after `current`, or `None` when the ramp is done.
fn next_ramp_value(current: u64, start: u64, stop: u64, step: u64) -> Option<u64> {
    if step == 0 {
        return None;
    }
    if start <= stop {
        let next = current.checked_add(step)?;
        (next <= stop).then_some(next)
    } else {
        let next = current.checked_sub(step)?;
        (next >= stop).then_some(next)
    }
}
