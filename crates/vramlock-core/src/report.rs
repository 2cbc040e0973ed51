//! Human-readable view of a session: counters, status and the slice map.

use std::fmt;
use std::time::Duration;

use crate::slice::{Outcome, SliceState};
use crate::verify::Verdict;

/// Default width of a glyph-map row.
pub const MAP_COLUMNS: usize = 64;

const LEGEND: &str =
    "VRAM slice map ('#'=allocated OK, 'X'=faulty locked, '?'=in-progress, '.'=freed after OOM)";

/// Point-in-time capture of everything the display shows.
///
/// Building a report never mutates the session; rendering it is plain
/// formatting and can be repeated freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub device_index: u32,
    pub device_name: String,
    pub slice_mib: u32,
    pub slice_bytes: usize,
    /// Slices still owning device memory.
    pub held: usize,
    pub verified: usize,
    pub faulty: usize,
    /// Glyph per slice, registry order.
    pub map: Vec<SliceState>,
    pub next_index: usize,
    pub elapsed: Duration,
    pub last_status: String,
    pub last_verdict: Option<Verdict>,
    pub finalized: bool,
    pub columns: usize,
}

impl Report {
    fn count(&self, state: SliceState) -> usize {
        self.map.iter().filter(|&&s| s == state).count()
    }

    /// Total MiB still held on the device.
    pub fn held_mib(&self) -> u64 {
        self.held as u64 * u64::from(self.slice_mib)
    }

    /// The glyph map alone, `columns` glyphs per row, each row prefixed by
    /// the index of its first slice.
    pub fn map_rows(&self) -> String {
        let columns = self.columns.max(1);
        let mut out = String::with_capacity(self.map.len() + self.map.len() / columns * 9);
        for (row, chunk) in self.map.chunks(columns).enumerate() {
            if row > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{:>6}: ", row * columns));
            out.extend(chunk.iter().map(|s| s.glyph()));
        }
        out
    }

    fn compare_line(&self) -> Option<String> {
        let verdict = self.last_verdict?;
        Some(match (verdict.outcome, verdict.first_difference) {
            (Outcome::Verified, _) => "MATCH".to_string(),
            (Outcome::Faulty, Some(offset)) => format!(
                "DIFFERENT ({} bytes differ, first at offset {offset:#x})",
                verdict.differing_bytes
            ),
            (Outcome::Faulty, None) => "DIFFERENT".to_string(),
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_progress = if self.finalized { 0 } else { self.count(SliceState::InProgress) };

        writeln!(f, "GPU {} ({})", self.device_index, self.device_name)?;
        writeln!(f, "Slice size: {} MiB ({} bytes)", self.slice_mib, self.slice_bytes)?;
        if self.finalized {
            writeln!(
                f,
                "Slices held (locked faulty): {}   OK: {}   Faulty locked: {}   In-progress: {}",
                self.count(SliceState::Faulty),
                self.verified,
                self.faulty,
                in_progress
            )?;
            writeln!(f, "Slices held (allocations): {}", self.held)?;
        } else {
            writeln!(
                f,
                "Slices held (allocations): {}   OK: {}   Faulty locked: {}   In-progress: {}",
                self.held, self.verified, self.faulty, in_progress
            )?;
        }
        writeln!(f, "Map entries: {}", self.map.len())?;
        writeln!(f, "Total held: {} MiB", self.held_mib())?;
        writeln!(f, "Elapsed: {}s", self.elapsed.as_secs())?;
        writeln!(f, "Next slice index: {}", self.next_index)?;
        writeln!(f, "Last status: {}", self.last_status)?;
        if let Some(line) = self.compare_line() {
            writeln!(f, "Last compare: {line}")?;
        }
        writeln!(f)?;
        writeln!(f, "{LEGEND}")?;
        if !self.map.is_empty() {
            writeln!(f, "{}", self.map_rows())?;
        }
        Ok(())
    }
}
