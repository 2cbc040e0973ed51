//! Exhaustion policy: keep the faulty slices, give everything else back.

use std::fmt;

use tracing::warn;

use crate::backend::DeviceMemory;
use crate::error::{BackendFault, Result};
use crate::registry::Registry;

/// Status line shown once allocation has failed.
pub const EXHAUSTED_STATUS: &str =
    "STOP: allocation failed (likely OOM). Freeing all OK slices; keeping only faulty locked.";

/// What happened at the exhaustion transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhaustion {
    /// Index the failed allocation would have received.
    pub at_index: usize,
    /// The backend's allocation failure.
    pub fault: BackendFault,
    /// Slices freed by the reclaimer.
    pub released: usize,
    /// Faulty slices still held.
    pub kept: usize,
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocation failed at slice #{}: {}", self.at_index, self.fault)
    }
}

/// Free every non-faulty slice and finalize `registry`.
///
/// Runs once per session, at the first allocation failure; the registry
/// refuses a second reclamation.
pub fn reclaim_on_exhaustion<B: DeviceMemory>(
    registry: &mut Registry<B::Handle>,
    backend: &mut B,
    fault: BackendFault,
) -> Result<Exhaustion> {
    let at_index = registry.len();
    warn!(at_index, %fault, "allocation failed; reclaiming non-faulty slices");
    let released = registry.reclaim_non_faulty(backend)?;
    Ok(Exhaustion { at_index, fault, released, kept: registry.held_count() })
}
