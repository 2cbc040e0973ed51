//! Where rendered reports end up.

use std::io::{self, Write};

use console::Term;

use crate::report::Report;

/// Destination for report frames.
pub trait Screen {
    /// Replace whatever is shown with `report`.
    fn draw(&mut self, report: &Report) -> io::Result<()>;

    /// Append a plain line below the current frame.
    fn note(&mut self, line: &str) -> io::Result<()>;
}

/// Full-screen redraw on stdout.
///
/// The cursor is hidden while the screen exists and shown again when it is
/// dropped, which covers both the graceful and the fatal-error exit.
pub struct TerminalScreen {
    term: Term,
}

impl TerminalScreen {
    pub fn stdout() -> io::Result<Self> {
        let term = Term::stdout();
        term.hide_cursor()?;
        Ok(Self { term })
    }
}

impl Screen for TerminalScreen {
    fn draw(&mut self, report: &Report) -> io::Result<()> {
        self.term.clear_screen()?;
        self.term.move_cursor_to(0, 0)?;
        write!(self.term, "{report}")?;
        self.term.flush()
    }

    fn note(&mut self, line: &str) -> io::Result<()> {
        self.term.write_line(line)?;
        self.term.flush()
    }
}

impl Drop for TerminalScreen {
    fn drop(&mut self) {
        let _ = self.term.show_cursor();
    }
}

/// Keeps every frame in memory instead of drawing it.
#[derive(Debug, Default)]
pub struct RecordingScreen {
    pub frames: Vec<Report>,
    pub notes: Vec<String>,
}

impl RecordingScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Report> {
        self.frames.last()
    }
}

impl Screen for RecordingScreen {
    fn draw(&mut self, report: &Report) -> io::Result<()> {
        self.frames.push(report.clone());
        Ok(())
    }

    fn note(&mut self, line: &str) -> io::Result<()> {
        self.notes.push(line.to_string());
        Ok(())
    }
}
