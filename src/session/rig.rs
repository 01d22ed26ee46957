//! rig.rs
//! Owns the hardware for one session: actuator link, telemetry receiver and
//! the active recording, if any.
//!
//! Teardown order is fixed: close the recording, stop the actuator, stop
//! telemetry, close the link.

use chrono::Local;
use std::path::{Path, PathBuf};
use log::{error, info, warn};

use crate::actuator::link::{ActuatorCommand, ActuatorLink};
use crate::actuator::trial::TrialRig;
use crate::config::Config;
use crate::error::{ActuatorError, RecorderError, TrialError, status_text};
use crate::telemetry::receiver::TelemetryReceiver;
use crate::telemetry::recorder::{Recorder, recording_path};

/// Finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecording {
    pub path: PathBuf,
    pub rows: u64,
}

pub struct Rig {
    link: Option<ActuatorLink>,
    telemetry: TelemetryReceiver,
    recorder: Option<Recorder>,
    recordings_dir: PathBuf,
    device_tag: String,
    shut_down: bool,
}

impl Rig {
    pub fn new(config: &Config, link: Option<ActuatorLink>, telemetry: TelemetryReceiver) -> Self {
        Self {
            link,
            telemetry,
            recorder: None,
            recordings_dir: PathBuf::from(&config.recordings_dir),
            device_tag: config.device_tag.clone(),
            shut_down: false,
        }
    }

    /// Opens the serial link and starts telemetry. Neither failure is fatal:
    /// the returned notes are status lines describing what came up.
    pub fn connect(config: &Config) -> (Self, Vec<(String, bool)>) {
        let mut notes = Vec::new();

        let link = match ActuatorLink::open(
            &config.serial_port,
            config.baud_rate,
            config.settle_delay(),
            config.reset_delay(),
        ) {
            Ok(link) => {
                notes.push(("Actuator: OK".to_string(), true));
                Some(link)
            }
            Err(e) => {
                error!("[Rig] {}", e);
                notes.push((format!("Actuator: FAIL - {}", status_text(&e)), false));
                None
            }
        };

        let mut telemetry = TelemetryReceiver::new();
        match telemetry.start(&config.telemetry_bind, config.telemetry_port) {
            Ok(_) => notes.push(("Ready".to_string(), true)),
            Err(e) => {
                error!("[Rig] {}", e);
                notes.push((format!("Mocap: FAIL - {}", status_text(&e)), false));
            }
        }

        (Self::new(config, link, telemetry), notes)
    }

    pub fn actuator_connected(&self) -> bool {
        self.link.as_ref().is_some_and(ActuatorLink::is_connected)
    }

    pub fn send(&mut self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        self.link
            .as_mut()
            .ok_or(ActuatorError::NotConnected)?
            .send(command)
    }

    pub fn telemetry(&self) -> &TelemetryReceiver {
        &self.telemetry
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.as_ref().is_some_and(Recorder::is_active)
    }

    pub fn recording_path(&self) -> Option<&Path> {
        self.recorder.as_ref().map(Recorder::path)
    }

    /// Starts a new recording. Refused while one is active or before any
    /// telemetry has been seen.
    pub fn start_recording(&mut self) -> Result<&Path, RecorderError> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }
        if !self.telemetry.has_data() {
            return Err(RecorderError::TelemetryUnavailable);
        }
        // A writer that died on its own is still parked here.
        if let Some(mut dead) = self.recorder.take() {
            dead.stop();
        }

        let path = recording_path(&self.recordings_dir, &self.device_tag, Local::now());
        self.record_to(path)
    }

    pub(crate) fn record_to(&mut self, path: PathBuf) -> Result<&Path, RecorderError> {
        let recorder = Recorder::start(self.telemetry.slot(), path)?;
        Ok(self.recorder.insert(recorder).path())
    }

    /// Stops the active recording; the file is flushed and closed on return.
    /// A writer that already died reports its fault instead of a saved file.
    pub fn stop_recording(&mut self) -> Result<SavedRecording, RecorderError> {
        let mut recorder = self.recorder.take().ok_or(RecorderError::NotRecording)?;
        recorder.stop();
        if let Some(fault) = recorder.fault() {
            return Err(RecorderError::WriteFailed(fault));
        }
        Ok(SavedRecording {
            path: recorder.path().to_path_buf(),
            rows: recorder.rows_written(),
        })
    }

    /// Reaps a recording whose writer died on a file error.
    pub fn take_recording_fault(&mut self) -> Option<String> {
        let faulted = self
            .recorder
            .as_ref()
            .is_some_and(|r| !r.is_active() && r.fault().is_some());
        if !faulted {
            return None;
        }
        let mut recorder = self.recorder.take()?;
        recorder.stop();
        recorder.fault()
    }

    /// Fixed-order teardown. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if self.recorder.is_some() {
            match self.stop_recording() {
                Ok(saved) => info!("[Rig] recording closed: {:?}", saved.path),
                Err(e) => warn!("[Rig] closing recording: {}", e),
            }
        }
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.send(ActuatorCommand::Stop) {
                warn!("[Rig] stop on shutdown failed: {}", e);
            }
        }
        self.telemetry.stop();
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
        info!("[Rig] shut down");
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TrialRig for Rig {
    fn home(&mut self) -> Result<(), TrialError> {
        Ok(self.send(ActuatorCommand::Home)?)
    }

    fn start_recording(&mut self) -> Result<(), TrialError> {
        Rig::start_recording(self)?;
        Ok(())
    }

    fn run(&mut self, speed: u32) -> Result<(), TrialError> {
        Ok(self.send(ActuatorCommand::Run(speed))?)
    }

    fn stop_actuator(&mut self) -> Result<(), TrialError> {
        Ok(self.send(ActuatorCommand::Stop)?)
    }

    fn stop_recording(&mut self) -> Result<(), TrialError> {
        Rig::stop_recording(self)?;
        Ok(())
    }
}
