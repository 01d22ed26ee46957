//! Terminal capability used by the control loop: draw styled text at a
//! row/column, present a frame, and read a key with a bounded wait.
//!
//! [`CrosstermTerminal`] is the real backend; it switches to the alternate
//! screen in raw mode and restores the terminal on drop.

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::{
    io::{Stdout, Write, stdout},
    time::Duration,
};
use log::warn;

use crate::error::TerminalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Esc,
    Backspace,
    Char(char),
    /// Ctrl-C; raw mode delivers it as a key instead of a signal.
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Bold,
    Selected,
    Ok,
    Error,
    Recording,
}

pub trait Terminal {
    /// (columns, rows)
    fn size(&self) -> Result<(u16, u16), TerminalError>;
    fn clear(&mut self) -> Result<(), TerminalError>;
    fn draw(&mut self, row: u16, col: u16, text: &str, style: Style) -> Result<(), TerminalError>;
    fn present(&mut self) -> Result<(), TerminalError>;
    /// Waits up to `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<Key>, TerminalError>;
}

pub struct CrosstermTerminal {
    out: Stdout,
}

impl CrosstermTerminal {
    pub fn new() -> Result<Self, TerminalError> {
        terminal::enable_raw_mode()?;
        let mut out = stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e.into());
        }
        Ok(Self { out })
    }
}

impl Drop for CrosstermTerminal {
    fn drop(&mut self) {
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("[Terminal] failed to leave raw mode: {}", e);
        }
    }
}

impl Terminal for CrosstermTerminal {
    fn size(&self) -> Result<(u16, u16), TerminalError> {
        Ok(terminal::size()?)
    }

    fn clear(&mut self) -> Result<(), TerminalError> {
        queue!(self.out, Clear(ClearType::All))?;
        Ok(())
    }

    fn draw(&mut self, row: u16, col: u16, text: &str, style: Style) -> Result<(), TerminalError> {
        queue!(self.out, MoveTo(col, row))?;
        match style {
            Style::Plain => {}
            Style::Bold => queue!(self.out, SetAttribute(Attribute::Bold))?,
            Style::Selected => queue!(
                self.out,
                SetForegroundColor(Color::White),
                SetBackgroundColor(Color::Blue)
            )?,
            Style::Ok => queue!(self.out, SetForegroundColor(Color::Green))?,
            Style::Error => queue!(self.out, SetForegroundColor(Color::Red))?,
            Style::Recording => queue!(self.out, SetForegroundColor(Color::Yellow))?,
        }
        queue!(self.out, Print(text), SetAttribute(Attribute::Reset), ResetColor)?;
        Ok(())
    }

    fn present(&mut self) -> Result<(), TerminalError> {
        self.out.flush()?;
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Result<Option<Key>, TerminalError> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => Ok(map_key(key)),
            _ => Ok(None),
        }
    }
}

fn map_key(key: KeyEvent) -> Option<Key> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Interrupt),
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Backspace | KeyCode::Delete => Some(Key::Backspace),
        KeyCode::Char(c) => Some(Key::Char(c)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_maps_to_interrupt() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(key), Some(Key::Interrupt));
        let plain = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert_eq!(map_key(plain), Some(Key::Char('c')));
    }

    #[test]
    fn editing_keys_map() {
        assert_eq!(map_key(KeyEvent::new(KeyCode::Delete, KeyModifiers::NONE)), Some(Key::Backspace));
        assert_eq!(map_key(KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE)), None);
    }
}
