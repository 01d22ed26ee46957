//! link.rs
//! Serial command channel to the linear actuator controller.
//! - ASCII, newline-terminated commands: `h`, `r <speed>`, `s`
//! - no acknowledgement framing; every send is followed by a settle delay so
//!   the firmware is never handed commands faster than it can absorb them
//! - a failed write drops the port: later sends report `NotConnected`

use std::{
    fmt,
    io::Write,
    thread,
    time::Duration,
};
use log::{debug, info, warn};

use crate::error::ActuatorError;

/// Commands understood by the actuator firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Home,
    Run(u32),
    Stop,
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Home => write!(f, "h"),
            ActuatorCommand::Run(speed) => write!(f, "r {}", speed),
            ActuatorCommand::Stop => write!(f, "s"),
        }
    }
}

type CommandSink = Box<dyn Write + Send>;

/// Owns the serial port. Single-threaded: callers serialise their commands.
pub struct ActuatorLink {
    port: Option<CommandSink>,
    name: String,
    settle_delay: Duration,
}

impl ActuatorLink {
    /// Opens `port` at `baud` and waits `reset_delay` for the controller to
    /// come out of its reset-on-connect.
    pub fn open(
        port: &str,
        baud: u32,
        settle_delay: Duration,
        reset_delay: Duration,
    ) -> Result<Self, ActuatorError> {
        let serial = serialport::new(port, baud)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|source| ActuatorError::Open {
                port: port.to_string(),
                source,
            })?;

        thread::sleep(reset_delay);
        info!("[Actuator] connected to {} @ {}", port, baud);

        Ok(Self {
            port: Some(Box::new(serial)),
            name: port.to_string(),
            settle_delay,
        })
    }

    /// Wraps an arbitrary byte sink (pty, socket, test buffer).
    pub fn from_writer(
        name: impl Into<String>,
        sink: impl Write + Send + 'static,
        settle_delay: Duration,
    ) -> Self {
        Self {
            port: Some(Box::new(sink)),
            name: name.into(),
            settle_delay,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn send(&mut self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        self.send_raw(&command.to_string())
    }

    /// Writes `command` plus a line terminator, then blocks for the settle delay.
    pub fn send_raw(&mut self, command: &str) -> Result<(), ActuatorError> {
        let port = self.port.as_mut().ok_or(ActuatorError::NotConnected)?;

        debug!(">> {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');

        if let Err(e) = port.write_all(&line).and_then(|_| port.flush()) {
            warn!("[Actuator] write to {} failed: {}", self.name, e);
            self.port = None;
            return Err(ActuatorError::Write(e));
        }

        thread::sleep(self.settle_delay);
        Ok(())
    }

    /// Closes the port. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
            info!("[Actuator] serial {} closed", self.name);
        }
    }
}

impl Drop for ActuatorLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Instant,
    };

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn commands_render_wire_text() {
        assert_eq!(ActuatorCommand::Home.to_string(), "h");
        assert_eq!(ActuatorCommand::Run(1500).to_string(), "r 1500");
        assert_eq!(ActuatorCommand::Stop.to_string(), "s");
    }

    #[test]
    fn send_appends_newline_and_waits_settle_delay() {
        let buf = SharedBuf::default();
        let mut link = ActuatorLink::from_writer("test", buf.clone(), Duration::from_millis(30));

        let started = Instant::now();
        link.send(ActuatorCommand::Run(250)).unwrap();
        link.send(ActuatorCommand::Stop).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));

        assert_eq!(buf.0.lock().unwrap().as_slice(), b"r 250\ns\n");
    }

    #[test]
    fn write_failure_then_reports_not_connected() {
        let mut link = ActuatorLink::from_writer("dead", BrokenPipe, Duration::ZERO);
        let first = link.send(ActuatorCommand::Home).unwrap_err();
        assert!(matches!(first, ActuatorError::Write(_)));
        assert!(!link.is_connected());

        let second = link.send(ActuatorCommand::Home).unwrap_err();
        assert!(matches!(second, ActuatorError::NotConnected));
    }

    #[test]
    fn close_is_idempotent_and_disconnects() {
        let mut link = ActuatorLink::from_writer("test", SharedBuf::default(), Duration::ZERO);
        link.close();
        link.close();
        assert!(matches!(link.send(ActuatorCommand::Stop), Err(ActuatorError::NotConnected)));
    }

    #[test]
    fn opening_missing_port_is_a_connection_error() {
        let err = ActuatorLink::open(
            "/dev/this-port-does-not-exist",
            115_200,
            Duration::ZERO,
            Duration::ZERO,
        )
        .err()
        .unwrap();
        assert!(err.is_connection());
    }
}
