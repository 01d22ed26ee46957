//! UI state owned by the control loop thread.
//!
//! Nothing here touches hardware: key presses become [`Intent`]s and the
//! control loop decides what to do with them. Background threads never see
//! this state.

use std::time::{Duration, Instant};

use crate::config::MAX_SPEED;
use crate::error::SpeedEntryError;
use crate::session::terminal::Key;

/// Longest speed entry; enough for `15000`.
pub const SPEED_DIGITS: usize = 5;

/// Shortest interval the velocity estimate will divide by.
const MIN_VELOCITY_DT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Home,
    Run,
    SetSpeed,
    Trial,
    Stop,
    RecordStart,
    RecordStop,
    Exit,
}

impl MenuAction {
    pub const ALL: [MenuAction; 8] = [
        MenuAction::Home,
        MenuAction::Run,
        MenuAction::SetSpeed,
        MenuAction::Trial,
        MenuAction::Stop,
        MenuAction::RecordStart,
        MenuAction::RecordStop,
        MenuAction::Exit,
    ];

    pub fn label(self, speed: u32) -> String {
        match self {
            MenuAction::Home => "Home".into(),
            MenuAction::Run => format!("Run {}", speed),
            MenuAction::SetSpeed => "Set Speed".into(),
            MenuAction::Trial => "Trial".into(),
            MenuAction::Stop => "Stop".into(),
            MenuAction::RecordStart => "Record Start".into(),
            MenuAction::RecordStop => "Record Stop".into(),
            MenuAction::Exit => "Exit".into(),
        }
    }
}

/// Digits typed so far in speed-entry mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeedEntry {
    buffer: String,
}

impl SpeedEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an arbitrary buffer (pre-fill, tests).
    pub fn from_buffer(buffer: impl Into<String>) -> Self {
        Self { buffer: buffer.into() }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Appends a digit; refused once the buffer holds [`SPEED_DIGITS`].
    pub fn push_digit(&mut self, c: char) -> bool {
        if !c.is_ascii_digit() || self.buffer.len() >= SPEED_DIGITS {
            return false;
        }
        self.buffer.push(c);
        true
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Empty parses as 0; the result is clamped to `0..=MAX_SPEED`.
    pub fn parse(&self) -> Result<u32, SpeedEntryError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        self.buffer
            .parse::<u32>()
            .map(|v| v.min(MAX_SPEED))
            .map_err(|_| SpeedEntryError::Invalid(self.buffer.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Navigating,
    EnteringSpeed(SpeedEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Ok,
    Error,
}

/// Transient one-line message; hidden once older than its time-to-live.
#[derive(Debug, Clone)]
pub struct StatusLine {
    text: String,
    kind: StatusKind,
    set_at: Instant,
}

impl StatusLine {
    fn new(now: Instant) -> Self {
        Self {
            text: String::new(),
            kind: StatusKind::Info,
            set_at: now,
        }
    }

    pub fn set(&mut self, text: impl Into<String>, kind: StatusKind, now: Instant) {
        self.text = text.into();
        self.kind = kind;
        self.set_at = now;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn visible(&self, now: Instant, ttl: Duration) -> Option<(&str, StatusKind)> {
        if self.text.is_empty() || now.saturating_duration_since(self.set_at) >= ttl {
            None
        } else {
            Some((&self.text, self.kind))
        }
    }
}

/// Finite-difference Y velocity between successive renders.
///
/// Differencing runs at render cadence, not packet cadence: "previous" is
/// whatever was on screen last frame.
#[derive(Debug, Clone, Default)]
pub struct VelocityEstimator {
    prev_y: Option<f64>,
    prev_at: Option<Instant>,
    velocity_y: f64,
}

impl VelocityEstimator {
    pub fn update(&mut self, y: f64, now: Instant) -> f64 {
        if let (Some(prev_y), Some(prev_at)) = (self.prev_y, self.prev_at) {
            let dt = now.saturating_duration_since(prev_at);
            if dt > MIN_VELOCITY_DT {
                self.velocity_y = (y - prev_y) / dt.as_secs_f64();
            }
        }
        self.prev_y = Some(y);
        self.prev_at = Some(now);
        self.velocity_y
    }

    pub fn velocity_y(&self) -> f64 {
        self.velocity_y
    }
}

/// What the control loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    None,
    Quit,
    Invoke(MenuAction),
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub selected: usize,
    pub mode: InputMode,
    pub speed: u32,
    pub status: StatusLine,
    pub velocity: VelocityEstimator,
}

impl SessionState {
    pub fn new(initial_speed: u32, now: Instant) -> Self {
        Self {
            selected: 0,
            mode: InputMode::Navigating,
            speed: initial_speed.min(MAX_SPEED),
            status: StatusLine::new(now),
            velocity: VelocityEstimator::default(),
        }
    }

    pub fn selected_action(&self) -> MenuAction {
        MenuAction::ALL[self.selected]
    }

    pub fn is_entering_speed(&self) -> bool {
        matches!(self.mode, InputMode::EnteringSpeed(_))
    }

    /// Switches to speed entry, pre-filled with the current speed.
    pub fn begin_speed_entry(&mut self, now: Instant) {
        self.mode = InputMode::EnteringSpeed(SpeedEntry::from_buffer(self.speed.to_string()));
        self.status.set(
            "Enter speed (0-15000), Enter to confirm, Esc to cancel",
            StatusKind::Info,
            now,
        );
    }

    pub fn handle_key(&mut self, key: Key, now: Instant) -> Intent {
        if matches!(key, Key::Char('q') | Key::Char('Q') | Key::Interrupt) {
            return Intent::Quit;
        }
        if self.is_entering_speed() {
            self.handle_speed_key(key, now);
            return Intent::None;
        }

        let len = MenuAction::ALL.len();
        match key {
            Key::Up => {
                self.selected = (self.selected + len - 1) % len;
                Intent::None
            }
            Key::Down => {
                self.selected = (self.selected + 1) % len;
                Intent::None
            }
            Key::Enter => match self.selected_action() {
                MenuAction::Exit => Intent::Quit,
                action => Intent::Invoke(action),
            },
            _ => Intent::None,
        }
    }

    fn handle_speed_key(&mut self, key: Key, now: Instant) {
        let InputMode::EnteringSpeed(entry) = &mut self.mode else {
            return;
        };
        match key {
            Key::Char(c) if c.is_ascii_digit() => {
                entry.push_digit(c);
            }
            Key::Backspace => entry.backspace(),
            Key::Enter => match entry.parse() {
                Ok(speed) => {
                    self.speed = speed;
                    self.mode = InputMode::Navigating;
                    self.status.set(format!("Speed set to {}", speed), StatusKind::Ok, now);
                }
                Err(_) => {
                    entry.clear();
                    self.status.set("Invalid speed value", StatusKind::Error, now);
                }
            },
            Key::Esc => {
                self.mode = InputMode::Navigating;
                self.status.set("Speed input cancelled", StatusKind::Info, now);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entering(buffer: &str) -> SessionState {
        let mut state = SessionState::new(50, Instant::now());
        state.mode = InputMode::EnteringSpeed(SpeedEntry::from_buffer(buffer));
        state
    }

    fn confirm(state: &mut SessionState) {
        state.handle_key(Key::Enter, Instant::now());
    }

    #[test]
    fn empty_buffer_commits_zero() {
        let mut state = entering("");
        confirm(&mut state);
        assert_eq!(state.speed, 0);
        assert_eq!(state.mode, InputMode::Navigating);
    }

    #[test]
    fn max_buffer_commits_max() {
        let mut state = entering("15000");
        confirm(&mut state);
        assert_eq!(state.speed, 15_000);
    }

    #[test]
    fn over_range_buffer_is_clamped() {
        let mut state = entering("20000");
        confirm(&mut state);
        assert_eq!(state.speed, MAX_SPEED);
    }

    #[test]
    fn sixth_digit_is_refused() {
        let mut entry = SpeedEntry::new();
        for c in "99999".chars() {
            assert!(entry.push_digit(c));
        }
        assert!(!entry.push_digit('9'));
        assert_eq!(entry.buffer(), "99999");
    }

    #[test]
    fn cancel_never_changes_speed() {
        for buffer in ["", "0", "123", "15000", "99999"] {
            let mut state = entering(buffer);
            state.speed = 777;
            state.handle_key(Key::Char('4'), Instant::now());
            state.handle_key(Key::Esc, Instant::now());
            assert_eq!(state.speed, 777);
            assert_eq!(state.mode, InputMode::Navigating);
        }
    }

    #[test]
    fn unparsable_buffer_reports_and_clears_without_leaving_mode() {
        let mut state = entering("12a");
        state.speed = 300;
        confirm(&mut state);
        assert_eq!(state.speed, 300);
        assert_eq!(state.mode, InputMode::EnteringSpeed(SpeedEntry::new()));
        assert_eq!(state.status.kind(), StatusKind::Error);
    }

    #[test]
    fn typing_and_backspace_edit_the_buffer() {
        let mut state = SessionState::new(50, Instant::now());
        state.begin_speed_entry(Instant::now());
        for key in [Key::Backspace, Key::Backspace, Key::Char('7'), Key::Char('5'), Key::Char('x')] {
            state.handle_key(key, Instant::now());
        }
        assert_eq!(state.mode, InputMode::EnteringSpeed(SpeedEntry::from_buffer("75")));
        confirm(&mut state);
        assert_eq!(state.speed, 75);
        assert_eq!(state.status.text(), "Speed set to 75");
    }

    #[test]
    fn menu_cursor_wraps() {
        let mut state = SessionState::new(50, Instant::now());
        state.handle_key(Key::Up, Instant::now());
        assert_eq!(state.selected_action(), MenuAction::Exit);
        state.handle_key(Key::Down, Instant::now());
        assert_eq!(state.selected_action(), MenuAction::Home);
    }

    #[test]
    fn confirm_invokes_selected_action_and_exit_quits() {
        let mut state = SessionState::new(50, Instant::now());
        state.handle_key(Key::Down, Instant::now());
        assert_eq!(state.handle_key(Key::Enter, Instant::now()), Intent::Invoke(MenuAction::Run));

        state.selected = MenuAction::ALL.len() - 1;
        assert_eq!(state.handle_key(Key::Enter, Instant::now()), Intent::Quit);
    }

    #[test]
    fn quit_key_works_in_both_modes() {
        let mut state = SessionState::new(50, Instant::now());
        assert_eq!(state.handle_key(Key::Char('Q'), Instant::now()), Intent::Quit);
        state.begin_speed_entry(Instant::now());
        assert_eq!(state.handle_key(Key::Char('q'), Instant::now()), Intent::Quit);
        assert_eq!(state.handle_key(Key::Interrupt, Instant::now()), Intent::Quit);
    }

    #[test]
    fn status_expires_after_ttl() {
        let t0 = Instant::now();
        let mut status = StatusLine::new(t0);
        status.set("Home sent", StatusKind::Ok, t0);
        let ttl = Duration::from_secs(3);
        assert_eq!(status.visible(t0 + Duration::from_secs(1), ttl), Some(("Home sent", StatusKind::Ok)));
        assert_eq!(status.visible(t0 + ttl, ttl), None);
    }

    #[test]
    fn velocity_is_finite_difference_and_skips_tiny_intervals() {
        let t0 = Instant::now();
        let mut v = VelocityEstimator::default();
        assert_eq!(v.update(1.0, t0), 0.0);
        let vy = v.update(1.5, t0 + Duration::from_millis(100));
        assert!((vy - 5.0).abs() < 1e-9);

        // sub-millisecond gap keeps the previous estimate
        let same = v.update(9.0, t0 + Duration::from_micros(100_500));
        assert!((same - 5.0).abs() < 1e-9);
    }
}
