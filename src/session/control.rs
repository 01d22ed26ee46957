//! control.rs
//! The interactive control loop.
//!
//! - Polls the terminal for a key with a bounded wait
//! - Advances a running trial by one poll per iteration
//! - Reaps asynchronous recorder/receiver faults into the status line
//! - Renders at a fixed interval, independent of the input poll rate
//!
//! Handlers never let a hardware failure escape: each one ends in a status
//! message. Only a terminal failure stops the loop, and teardown still runs.

use std::time::{Duration, Instant};
use log::{debug, error, info};

use crate::actuator::link::ActuatorCommand;
use crate::actuator::trial::{TrialOutcome, TrialProgress, TrialSequencer, TrialTimings};
use crate::config::{Config, MAX_SPEED};
use crate::error::{ActuatorError, RecorderError, TerminalError, status_text};
use crate::session::rig::Rig;
use crate::session::state::{InputMode, Intent, MenuAction, SessionState, StatusKind};
use crate::session::terminal::{Key, Style, Terminal};

const TITLE: &str = "= LINEAR ACTUATOR CONTROL =";
/// Every line is indented by this many columns.
const LEFT_MARGIN: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ControlSession<T: Terminal> {
    terminal: T,
    rig: Rig,
    state: SessionState,
    trial: Option<TrialSequencer>,
    timings: TrialTimings,
    render_interval: Duration,
    input_poll: Duration,
    status_ttl: Duration,
    last_render: Option<Instant>,
    receiver_fault_shown: bool,
}

impl<T: Terminal> ControlSession<T> {
    pub fn new(config: &Config, rig: Rig, terminal: T) -> Self {
        Self {
            terminal,
            rig,
            state: SessionState::new(config.speed_low, Instant::now()),
            trial: None,
            timings: TrialTimings::from(&config.trial),
            render_interval: config.render_interval(),
            input_poll: config.input_poll(),
            status_ttl: config.status_ttl(),
            last_render: None,
            receiver_fault_shown: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn trial_running(&self) -> bool {
        self.trial.is_some()
    }

    /// Sets the status line as of now.
    pub fn set_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.state.status.set(text, kind, Instant::now());
    }

    /// Runs until the operator quits or the terminal fails, then tears the
    /// rig down in its fixed order.
    pub fn run(mut self) -> Result<(), TerminalError> {
        info!("[Session] started");
        let result = self.event_loop();
        if let Err(e) = &result {
            error!("[Session] terminal failure: {}", e);
        }
        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), TerminalError> {
        loop {
            let now = Instant::now();
            self.tick(now);
            if self.render_due(now) {
                self.render(now)?;
            }
            if let Some(key) = self.terminal.poll_key(self.input_poll)? {
                if self.handle_key(key, Instant::now()) == Flow::Quit {
                    return Ok(());
                }
            }
        }
    }

    fn render_due(&self, now: Instant) -> bool {
        self.last_render
            .is_none_or(|last| now.saturating_duration_since(last) >= self.render_interval)
    }

    /// Background work for one loop iteration.
    pub fn tick(&mut self, now: Instant) {
        if let Some(trial) = self.trial.as_mut() {
            let status_line = &mut self.state.status;
            let mut status = |text: &str| status_line.set(text, StatusKind::Info, now);
            if let TrialProgress::Finished(outcome) = trial.poll(now, &mut self.rig, &mut status) {
                self.trial = None;
                self.report_outcome(&outcome, now);
            }
        }

        if let Some(fault) = self.rig.take_recording_fault() {
            error!("[Session] recording aborted: {}", fault);
            let text = format!("ERROR: {}", status_text(&fault));
            self.state.status.set(text, StatusKind::Error, now);
        }

        if !self.receiver_fault_shown {
            if let Some(fault) = self.rig.telemetry().fault() {
                self.receiver_fault_shown = true;
                let text = format!("Mocap: FAIL - {}", status_text(&fault));
                self.state.status.set(text, StatusKind::Error, now);
            }
        }
    }

    pub fn handle_key(&mut self, key: Key, now: Instant) -> Flow {
        match self.state.handle_key(key, now) {
            Intent::None => Flow::Continue,
            Intent::Quit => Flow::Quit,
            Intent::Invoke(action) => {
                self.invoke(action, now);
                Flow::Continue
            }
        }
    }

    /// Dispatches a menu action. Exit is handled by the caller as a quit.
    pub fn invoke(&mut self, action: MenuAction, now: Instant) {
        debug!("[Session] action {:?}", action);
        if self.trial.is_some() && !matches!(action, MenuAction::Stop | MenuAction::Exit) {
            self.state.status.set("Trial in progress", StatusKind::Error, now);
            return;
        }
        match action {
            MenuAction::Home => self.command(ActuatorCommand::Home, "Home sent".into(), now),
            MenuAction::Run => {
                let speed = self.state.speed;
                self.command(ActuatorCommand::Run(speed), format!("Run {}", speed), now);
            }
            MenuAction::SetSpeed => self.state.begin_speed_entry(now),
            MenuAction::Trial => self.start_trial(now),
            MenuAction::Stop => self.stop(now),
            MenuAction::RecordStart => self.record_start(now),
            MenuAction::RecordStop => self.record_stop(now),
            MenuAction::Exit => {}
        }
    }

    fn command(&mut self, command: ActuatorCommand, ok_text: String, now: Instant) {
        match self.rig.send(command) {
            Ok(()) => self.state.status.set(ok_text, StatusKind::Ok, now),
            Err(e) => self.report_actuator_error(&e, now),
        }
    }

    fn report_actuator_error(&mut self, err: &ActuatorError, now: Instant) {
        let text = match err {
            ActuatorError::NotConnected => "ERROR: Actuator not connected".to_string(),
            other => format!("ERROR: {}", status_text(other)),
        };
        self.state.status.set(text, StatusKind::Error, now);
    }

    fn start_trial(&mut self, now: Instant) {
        if !self.rig.actuator_connected() {
            self.report_actuator_error(&ActuatorError::NotConnected, now);
            return;
        }
        let status_line = &mut self.state.status;
        let mut status = |text: &str| status_line.set(text, StatusKind::Info, now);
        self.trial = Some(TrialSequencer::start(self.state.speed, self.timings, now, &mut status));
    }

    fn stop(&mut self, now: Instant) {
        if let Some(mut trial) = self.trial.take() {
            let outcome = trial.cancel(&mut self.rig);
            self.report_outcome(&outcome, now);
            return;
        }
        self.command(ActuatorCommand::Stop, "Stop sent".into(), now);
    }

    fn record_start(&mut self, now: Instant) {
        let (text, kind) = match self.rig.start_recording() {
            Ok(path) => {
                info!("[Session] recording to {:?}", path);
                ("Recording...".to_string(), StatusKind::Ok)
            }
            Err(RecorderError::AlreadyRecording) => ("Already recording".to_string(), StatusKind::Info),
            Err(RecorderError::TelemetryUnavailable) => {
                ("ERROR: Mocap not ready".to_string(), StatusKind::Error)
            }
            Err(e) => (format!("ERROR: {}", status_text(&e)), StatusKind::Error),
        };
        self.state.status.set(text, kind, now);
    }

    fn record_stop(&mut self, now: Instant) {
        let (text, kind) = match self.rig.stop_recording() {
            Ok(saved) => {
                info!("[Session] saved {} rows to {:?}", saved.rows, saved.path);
                let name = saved
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (format!("Saved: {}", name), StatusKind::Ok)
            }
            Err(RecorderError::NotRecording) => ("Not recording".to_string(), StatusKind::Info),
            Err(e) => (format!("ERROR: {}", status_text(&e)), StatusKind::Error),
        };
        self.state.status.set(text, kind, now);
    }

    fn report_outcome(&mut self, outcome: &TrialOutcome, now: Instant) {
        let kind = match outcome {
            TrialOutcome::Completed => StatusKind::Ok,
            TrialOutcome::Aborted { .. } => StatusKind::Error,
            TrialOutcome::Cancelled => StatusKind::Info,
        };
        self.state.status.set(outcome.status(), kind, now);
    }

    /// Draws one frame and updates the velocity estimate.
    pub fn render(&mut self, now: Instant) -> Result<(), TerminalError> {
        self.last_render = Some(now);
        let (cols, rows) = self.terminal.size()?;
        let width = usize::from(cols.saturating_sub(2));
        let frame = self.compose(now, rows);

        self.terminal.clear()?;
        for (row, text, style) in frame {
            if row >= rows {
                continue;
            }
            let line: String = text.chars().take(width).collect();
            self.terminal.draw(row, LEFT_MARGIN, &line, style)?;
        }
        self.terminal.present()
    }

    fn compose(&mut self, now: Instant, rows: u16) -> Vec<(u16, String, Style)> {
        let mut frame = vec![(0, TITLE.to_string(), Style::Bold)];

        let entering = self.state.is_entering_speed();
        if let InputMode::EnteringSpeed(entry) = &self.state.mode {
            let shown = if entry.buffer().is_empty() { "0" } else { entry.buffer() };
            frame.push((
                1,
                format!("ENTER SPEED: {}_  (0-{}, Enter to confirm, Esc to cancel)", shown, MAX_SPEED),
                Style::Bold,
            ));
        }

        let menu_start: u16 = if entering { 3 } else { 2 };
        for (i, action) in MenuAction::ALL.iter().enumerate() {
            let y = menu_start + i as u16;
            if y >= rows.saturating_sub(3) {
                break;
            }
            let selected = i == self.state.selected;
            let prefix = if selected { ">> " } else { "   " };
            let style = if selected { Style::Selected } else { Style::Plain };
            frame.push((y, format!("{}{}", prefix, action.label(self.state.speed)), style));
        }

        let status_y = menu_start + MenuAction::ALL.len() as u16 + 2 + u16::from(entering);
        if let Some((text, kind)) = self.state.status.visible(now, self.status_ttl) {
            let style = match kind {
                StatusKind::Info => Style::Plain,
                StatusKind::Ok => Style::Ok,
                StatusKind::Error => Style::Error,
            };
            frame.push((status_y, text.to_string(), style));
        }

        if let Some(sample) = self.rig.telemetry().latest() {
            let vy = self.state.velocity.update(f64::from(sample.body_y), now);
            frame.push((status_y + 1, format!("Leg Vel Y: {:+.4} m/s", vy), Style::Plain));
        }

        if self.rig.is_recording() {
            if let Some(name) = self.rig.recording_path().and_then(|p| p.file_name()) {
                frame.push((status_y + 2, format!("REC: {}", name.to_string_lossy()), Style::Recording));
            }
        }
        frame
    }

    /// Aborts a running trial, then tears the rig down.
    pub fn shutdown(&mut self) {
        if let Some(mut trial) = self.trial.take() {
            trial.cancel(&mut self.rig);
        }
        self.rig.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::link::ActuatorLink;
    use crate::telemetry::receiver::TelemetryReceiver;
    use crate::telemetry::sample::TelemetrySample;
    use std::collections::VecDeque;
    use std::io::{self, Write};
    use std::sync::Arc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeTerminal {
        keys: VecDeque<Key>,
        frame: Vec<(u16, u16, String, Style)>,
        renders: usize,
    }

    impl FakeTerminal {
        fn line(&self, row: u16) -> Option<&str> {
            self.frame.iter().find(|(r, ..)| *r == row).map(|(_, _, t, _)| t.as_str())
        }
    }

    impl Terminal for FakeTerminal {
        fn size(&self) -> Result<(u16, u16), TerminalError> {
            Ok((80, 24))
        }
        fn clear(&mut self) -> Result<(), TerminalError> {
            self.frame.clear();
            self.renders += 1;
            Ok(())
        }
        fn draw(&mut self, row: u16, col: u16, text: &str, style: Style) -> Result<(), TerminalError> {
            self.frame.push((row, col, text.to_string(), style));
            Ok(())
        }
        fn present(&mut self) -> Result<(), TerminalError> {
            Ok(())
        }
        fn poll_key(&mut self, _timeout: Duration) -> Result<Option<Key>, TerminalError> {
            Ok(Some(self.keys.pop_front().unwrap_or(Key::Char('q'))))
        }
    }

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(link: Option<ActuatorLink>) -> (ControlSession<FakeTerminal>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            recordings_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let rig = Rig::new(&config, link, TelemetryReceiver::new());
        (ControlSession::new(&config, rig, FakeTerminal::default()), dir)
    }

    fn wired() -> (ActuatorLink, Wire) {
        let wire = Wire::default();
        let link = ActuatorLink::from_writer("fake", wire.clone(), Duration::ZERO);
        (link, wire)
    }

    #[test]
    fn actions_without_link_report_not_connected() {
        let (mut s, _dir) = session(None);
        let now = Instant::now();
        s.invoke(MenuAction::Home, now);
        assert_eq!(s.state().status.text(), "ERROR: Actuator not connected");
        assert_eq!(s.state().status.kind(), StatusKind::Error);

        s.invoke(MenuAction::Trial, now);
        assert!(!s.trial_running());
    }

    #[test]
    fn run_uses_current_speed() {
        let (link, wire) = wired();
        let (mut s, _dir) = session(Some(link));
        s.state_mut().speed = 1234;
        s.invoke(MenuAction::Run, Instant::now());
        assert_eq!(s.state().status.text(), "Run 1234");
        assert_eq!(wire.0.lock().as_slice(), b"r 1234\n");
    }

    #[test]
    fn recording_needs_telemetry_and_refuses_a_second_start() {
        let (mut s, _dir) = session(None);
        let now = Instant::now();
        s.invoke(MenuAction::RecordStart, now);
        assert_eq!(s.state().status.text(), "ERROR: Mocap not ready");

        s.rig().telemetry().slot().publish(TelemetrySample::from_marker(0.0, 1.0, 0.0));
        s.invoke(MenuAction::RecordStart, now);
        assert!(s.rig().is_recording());
        s.invoke(MenuAction::RecordStart, now);
        assert_eq!(s.state().status.text(), "Already recording");

        s.invoke(MenuAction::RecordStop, now);
        assert!(s.state().status.text().starts_with("Saved: linear_actuator_"));
        s.invoke(MenuAction::RecordStop, now);
        assert_eq!(s.state().status.text(), "Not recording");
    }

    #[test]
    fn only_stop_is_accepted_during_a_trial() {
        let (link, wire) = wired();
        let (mut s, _dir) = session(Some(link));
        let now = Instant::now();
        s.invoke(MenuAction::Trial, now);
        assert!(s.trial_running());
        assert_eq!(s.state().status.text(), "Trial: Homing...");

        s.invoke(MenuAction::Run, now);
        assert_eq!(s.state().status.text(), "Trial in progress");
        assert!(wire.0.lock().is_empty());

        s.invoke(MenuAction::Stop, now);
        assert!(!s.trial_running());
        assert_eq!(s.state().status.text(), "Trial cancelled");
    }

    #[test]
    fn trial_without_telemetry_fails_at_record_step() {
        let (link, wire) = wired();
        let (mut s, _dir) = session(Some(link));
        s.timings = TrialTimings::ZERO;
        s.invoke(MenuAction::Trial, Instant::now());
        s.tick(Instant::now());

        assert!(!s.trial_running());
        assert_eq!(s.state().status.text(), "Trial failed at record: mocap not ready");
        assert_eq!(wire.0.lock().as_slice(), b"h\n");
    }

    #[test]
    fn frame_layout_follows_mode() {
        let (mut s, _dir) = session(None);
        let now = Instant::now();
        s.render(now).unwrap();
        assert_eq!(s.terminal().line(0), Some(TITLE));
        assert_eq!(s.terminal().line(2), Some(">> Home"));
        assert_eq!(s.terminal().line(3), Some("   Run 50"));
        assert!(s.terminal().frame.iter().all(|(_, col, ..)| *col == LEFT_MARGIN));

        s.invoke(MenuAction::SetSpeed, now);
        s.handle_key(Key::Backspace, now);
        s.handle_key(Key::Backspace, now);
        s.render(now).unwrap();
        assert!(s.terminal().line(1).unwrap().starts_with("ENTER SPEED: 0_"));
        assert_eq!(s.terminal().line(3), Some(">> Home"));
        // status sits below the menu, one row lower in speed mode
        assert_eq!(s.terminal().line(3 + 8 + 2 + 1).map(|t| t.starts_with("Enter speed")), Some(true));
    }

    #[test]
    fn velocity_readout_appears_with_telemetry() {
        let (mut s, _dir) = session(None);
        let t0 = Instant::now();
        s.rig().telemetry().slot().publish(TelemetrySample::from_marker(0.0, 1.0, 0.0));
        s.render(t0).unwrap();
        s.rig().telemetry().slot().publish(TelemetrySample::from_marker(0.0, 1.5, 0.0));
        s.render(t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(s.terminal().line(2 + 8 + 2 + 1), Some("Leg Vel Y: +5.0000 m/s"));
    }

    #[test]
    fn run_loop_quits_and_stops_the_actuator() {
        let (link, wire) = wired();
        let (mut s, _dir) = session(Some(link));
        s.terminal.keys.extend([Key::Down, Key::Enter, Key::Char('q')]);
        s.run().unwrap();
        assert_eq!(wire.0.lock().as_slice(), b"r 50\ns\n");
    }

    #[test]
    fn key_bursts_do_not_force_extra_renders() {
        let (mut s, _dir) = session(None);
        s.terminal.keys.extend(std::iter::repeat_n(Key::Down, 50));

        let started = Instant::now();
        s.event_loop().unwrap();
        let elapsed = started.elapsed();

        let allowed = 1 + (elapsed.as_millis() / s.render_interval.as_millis()) as usize;
        assert!(
            s.terminal.renders <= allowed,
            "{} renders in {:?}",
            s.terminal.renders,
            elapsed
        );
        assert_eq!(s.state().selected, 50 % MenuAction::ALL.len());
    }

    #[test]
    fn velocity_tracks_body_y() {
        let (mut s, _dir) = session(None);
        let t0 = Instant::now();
        let slot = s.rig().telemetry().slot();
        slot.publish(TelemetrySample { body_y: 0.0, foot_y: 9.0, ..TelemetrySample::from_marker(0.0, 0.0, 0.0) });
        s.render(t0).unwrap();
        slot.publish(TelemetrySample { body_y: 0.2, foot_y: 9.0, ..TelemetrySample::from_marker(0.0, 0.0, 0.0) });
        s.render(t0 + Duration::from_millis(100)).unwrap();
        assert!((s.state().velocity.velocity_y() - 2.0).abs() < 1e-6);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dead_recorder_is_reaped_into_an_error_status() {
        let (mut s, _dir) = session(None);
        s.rig().telemetry().slot().publish(TelemetrySample::from_marker(0.0, 1.0, 0.0));
        s.rig.record_to(std::path::PathBuf::from("/dev/full")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while s.rig().is_recording() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!s.rig().is_recording());
        assert!(s.rig().recording_path().is_some());

        s.tick(Instant::now());
        assert!(s.rig().recording_path().is_none());
        assert!(s.state().status.text().starts_with("ERROR: "));
        assert_eq!(s.state().status.kind(), StatusKind::Error);

        s.invoke(MenuAction::RecordStop, Instant::now());
        assert_eq!(s.state().status.text(), "Not recording");
    }
}
