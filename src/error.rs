//! Error types for every component.
//!
//! Background workers (receiver, recorder) never hand these back to the control
//! loop; they log them and keep a short fault string instead. Everything the
//! operator sees is squeezed through [`status_text`].

use std::{io, net::SocketAddr, path::PathBuf};
use thiserror::Error;

/// Longest error text shown on the status line.
pub const STATUS_ERROR_CHARS: usize = 30;

/// Serial link to the actuator controller.
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("actuator link not connected")]
    NotConnected,

    #[error("cannot open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial write failed: {0}")]
    Write(#[from] io::Error),
}

impl ActuatorError {
    /// True for "absent or broken link" as opposed to a failed write.
    pub fn is_connection(&self) -> bool {
        matches!(self, ActuatorError::NotConnected | ActuatorError::Open { .. })
    }
}

/// UDP telemetry feed.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed packet: expected 12 bytes, got {len}")]
    Malformed { len: usize },

    #[error("receiver already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("failed to spawn receive thread: {0}")]
    Spawn(io::Error),
}

/// Session recording to CSV.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recording file {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("already recording")]
    AlreadyRecording,

    #[error("mocap not ready")]
    TelemetryUnavailable,

    #[error("not recording")]
    NotRecording,

    /// The writer died on its own; the file ends at the last complete row.
    #[error("recording failed: {0}")]
    WriteFailed(String),

    #[error("failed to spawn recorder thread: {0}")]
    Spawn(io::Error),
}

/// A failed step of the trial choreography.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Numeric speed entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeedEntryError {
    #[error("invalid speed value {0:?}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML in config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation failed: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
#[error("terminal failure: {0}")]
pub struct TerminalError(#[from] pub io::Error);

/// Top-level error for the binary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("{0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Bounded-length rendering of an error for the status line.
pub fn status_text(err: &dyn std::fmt::Display) -> String {
    err.to_string().chars().take(STATUS_ERROR_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_is_bounded() {
        let err = RecorderError::File {
            path: PathBuf::from("/a/very/long/path/that/keeps/going/forever.csv"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = status_text(&err);
        assert_eq!(text.chars().count(), STATUS_ERROR_CHARS);
        assert!(text.starts_with("recording file"));
    }

    #[test]
    fn connection_errors_are_distinguishable_from_write_errors() {
        assert!(ActuatorError::NotConnected.is_connection());
        let write = ActuatorError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!write.is_connection());
    }
}
