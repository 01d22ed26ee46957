//! trial.rs
//! Fixed trial choreography: home → start recording → run → stop → stop recording.
//!
//! Each step is announced, then after a short announce delay it executes and
//! the sequencer dwells for a step-specific time (homing, run duration, settle).
//! The sequencer never sleeps itself: `poll()` is called from the control loop
//! and returns immediately, so input and rendering stay live during a trial.
//!
//! Any failed step ends the trial early. On that path the actuator is stopped if
//! it was set running and a recording that was started is always stopped.

use std::{
    fmt,
    thread,
    time::{Duration, Instant},
};
use log::{info, warn};

use crate::config::TrialConfig;
use crate::error::{TrialError, status_text};

/// Hardware operations the trial drives.
pub trait TrialRig {
    fn home(&mut self) -> Result<(), TrialError>;
    fn start_recording(&mut self) -> Result<(), TrialError>;
    fn run(&mut self, speed: u32) -> Result<(), TrialError>;
    fn stop_actuator(&mut self) -> Result<(), TrialError>;
    fn stop_recording(&mut self) -> Result<(), TrialError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStep {
    Home,
    StartRecording,
    Run,
    StopActuator,
    StopRecording,
}

impl TrialStep {
    fn next(self) -> Option<TrialStep> {
        match self {
            TrialStep::Home => Some(TrialStep::StartRecording),
            TrialStep::StartRecording => Some(TrialStep::Run),
            TrialStep::Run => Some(TrialStep::StopActuator),
            TrialStep::StopActuator => Some(TrialStep::StopRecording),
            TrialStep::StopRecording => None,
        }
    }

    fn announcement(self, speed: u32) -> String {
        match self {
            TrialStep::Home => "Trial: Homing...".into(),
            TrialStep::StartRecording => "Trial: Starting recording...".into(),
            TrialStep::Run => format!("Trial: Running at {}...", speed),
            TrialStep::StopActuator => "Trial: Stopping motor...".into(),
            TrialStep::StopRecording => "Trial: Stopping recording...".into(),
        }
    }
}

impl fmt::Display for TrialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStep::Home => "home",
            TrialStep::StartRecording => "record",
            TrialStep::Run => "run",
            TrialStep::StopActuator => "stop",
            TrialStep::StopRecording => "save",
        };
        f.write_str(name)
    }
}

/// Delays between trial steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialTimings {
    pub announce: Duration,
    pub homing: Duration,
    pub settle: Duration,
    pub run: Duration,
}

impl TrialTimings {
    pub const ZERO: TrialTimings = TrialTimings {
        announce: Duration::ZERO,
        homing: Duration::ZERO,
        settle: Duration::ZERO,
        run: Duration::ZERO,
    };

    fn dwell(&self, step: TrialStep) -> Duration {
        match step {
            TrialStep::Home => self.homing,
            TrialStep::Run => self.run,
            TrialStep::StartRecording | TrialStep::StopActuator | TrialStep::StopRecording => {
                self.settle
            }
        }
    }
}

impl From<&TrialConfig> for TrialTimings {
    fn from(c: &TrialConfig) -> Self {
        Self {
            announce: Duration::from_millis(c.announce_ms),
            homing: Duration::from_millis(c.homing_ms),
            settle: Duration::from_millis(c.settle_ms),
            run: Duration::from_millis(c.run_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed,
    /// A step failed; remaining steps were skipped.
    Aborted { step: TrialStep, reason: String },
    /// Operator stopped the trial.
    Cancelled,
}

impl TrialOutcome {
    /// Final status line for the operator.
    pub fn status(&self) -> String {
        match self {
            TrialOutcome::Completed => "Trial completed!".into(),
            TrialOutcome::Aborted { step, reason } => {
                format!("Trial failed at {}: {}", step, reason)
            }
            TrialOutcome::Cancelled => "Trial cancelled".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialProgress {
    Running,
    Finished(TrialOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// Announced, waiting to execute.
    Pending(TrialStep),
    /// Executed, dwelling before the next step.
    Dwell(TrialStep),
    Finished(TrialOutcome),
}

pub struct TrialSequencer {
    speed: u32,
    timings: TrialTimings,
    phase: Phase,
    deadline: Instant,
    motion_started: bool,
    recording_open: bool,
}

impl TrialSequencer {
    /// Starts a trial at `speed`, announcing the first step through `status`.
    pub fn start(
        speed: u32,
        timings: TrialTimings,
        now: Instant,
        status: &mut dyn FnMut(&str),
    ) -> Self {
        info!("[Trial] starting at speed {}", speed);
        status(&TrialStep::Home.announcement(speed));
        Self {
            speed,
            timings,
            phase: Phase::Pending(TrialStep::Home),
            deadline: now + timings.announce,
            motion_started: false,
            recording_open: false,
        }
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished(_))
    }

    /// Advances through every step whose delay has elapsed by `now`.
    pub fn poll(
        &mut self,
        now: Instant,
        rig: &mut dyn TrialRig,
        status: &mut dyn FnMut(&str),
    ) -> TrialProgress {
        loop {
            match self.phase.clone() {
                Phase::Finished(outcome) => return TrialProgress::Finished(outcome),
                _ if now < self.deadline => return TrialProgress::Running,
                Phase::Pending(step) => match self.execute(step, rig) {
                    Ok(()) => {
                        self.phase = Phase::Dwell(step);
                        self.deadline = now + self.timings.dwell(step);
                    }
                    Err(e) => {
                        warn!("[Trial] step {} failed: {}", step, e);
                        self.unwind(rig);
                        let outcome = TrialOutcome::Aborted {
                            step,
                            reason: status_text(&e),
                        };
                        self.phase = Phase::Finished(outcome.clone());
                        return TrialProgress::Finished(outcome);
                    }
                },
                Phase::Dwell(step) => match step.next() {
                    Some(next) => {
                        status(&next.announcement(self.speed));
                        self.phase = Phase::Pending(next);
                        self.deadline = now + self.timings.announce;
                    }
                    None => {
                        info!("[Trial] completed");
                        self.phase = Phase::Finished(TrialOutcome::Completed);
                    }
                },
            }
        }
    }

    /// Operator abort: stops motion and recording, skips remaining steps.
    pub fn cancel(&mut self, rig: &mut dyn TrialRig) -> TrialOutcome {
        if let Phase::Finished(outcome) = &self.phase {
            return outcome.clone();
        }
        info!("[Trial] cancelled");
        self.unwind(rig);
        self.phase = Phase::Finished(TrialOutcome::Cancelled);
        TrialOutcome::Cancelled
    }

    /// Drives the trial to the end on the calling thread.
    pub fn run_to_end(&mut self, rig: &mut dyn TrialRig, status: &mut dyn FnMut(&str)) -> TrialOutcome {
        loop {
            match self.poll(Instant::now(), rig, status) {
                TrialProgress::Finished(outcome) => return outcome,
                TrialProgress::Running => {
                    let wait = self.deadline.saturating_duration_since(Instant::now());
                    thread::sleep(wait.max(Duration::from_millis(1)));
                }
            }
        }
    }

    fn execute(&mut self, step: TrialStep, rig: &mut dyn TrialRig) -> Result<(), TrialError> {
        match step {
            TrialStep::Home => rig.home(),
            TrialStep::StartRecording => {
                rig.start_recording()?;
                self.recording_open = true;
                Ok(())
            }
            TrialStep::Run => {
                // Counted as moving even if the write fails part-way.
                self.motion_started = true;
                rig.run(self.speed)
            }
            TrialStep::StopActuator => {
                rig.stop_actuator()?;
                self.motion_started = false;
                Ok(())
            }
            TrialStep::StopRecording => {
                self.recording_open = false;
                rig.stop_recording()
            }
        }
    }

    fn unwind(&mut self, rig: &mut dyn TrialRig) {
        if self.motion_started {
            if let Err(e) = rig.stop_actuator() {
                warn!("[Trial] stop during abort failed: {}", e);
            }
            self.motion_started = false;
        }
        if self.recording_open {
            if let Err(e) = rig.stop_recording() {
                warn!("[Trial] closing recording during abort failed: {}", e);
            }
            self.recording_open = false;
        }
    }
}
