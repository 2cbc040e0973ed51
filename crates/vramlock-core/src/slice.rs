//! One fixed-size unit of device memory under test.

use std::fmt;

/// Lifecycle of a slice.
///
/// Legal transitions: `InProgress → Verified`, `InProgress → Faulty`, and at
/// exhaustion `InProgress | Verified → Released`. `Faulty` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceState {
    /// Allocated, verification not finished yet.
    InProgress,
    /// Both readbacks matched; allocation still held.
    Verified,
    /// Readbacks differed; allocation held forever.
    Faulty,
    /// Freed during reclamation.
    Released,
}

impl SliceState {
    /// Glyph used in the slice map.
    pub const fn glyph(self) -> char {
        match self {
            Self::InProgress => '?',
            Self::Verified => '#',
            Self::Faulty => 'X',
            Self::Released => '.',
        }
    }
}

impl fmt::Display for SliceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in-progress"),
            Self::Verified => write!(f, "verified"),
            Self::Faulty => write!(f, "faulty"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Verdict of one verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Verified,
    Faulty,
}

impl From<Outcome> for SliceState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Verified => Self::Verified,
            Outcome::Faulty => Self::Faulty,
        }
    }
}

/// A registry entry: a backend handle plus its verification state.
#[derive(Debug)]
pub struct Slice<H> {
    pub(crate) handle: Option<H>,
    pub(crate) state: SliceState,
}

impl<H> Slice<H> {
    pub(crate) fn new(handle: H) -> Self {
        Self { handle: Some(handle), state: SliceState::InProgress }
    }

    pub fn state(&self) -> SliceState {
        self.state
    }

    /// Backend handle, `None` once the slice has been released.
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    /// Whether the slice still owns device memory.
    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }
}
