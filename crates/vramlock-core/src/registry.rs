//! Ordered record of every slice allocated in a session.

use tracing::{debug, info};

use crate::backend::DeviceMemory;
use crate::error::{BackendFault, LockError, Result};
use crate::slice::{Outcome, Slice, SliceState};

/// Slices in allocation order plus the verdict counters.
///
/// A slice's index is its allocation ordinal and never changes. Once
/// [`Registry::reclaim_non_faulty`] has run the registry is finalized and
/// refuses every further mutation.
#[derive(Debug)]
pub struct Registry<H> {
    slice_bytes: usize,
    slices: Vec<Slice<H>>,
    verified_count: usize,
    faulty_count: usize,
    finalized: bool,
}

impl<H> Registry<H> {
    pub fn new(slice_bytes: usize) -> Self {
        Self {
            slice_bytes,
            slices: Vec::with_capacity(64),
            verified_count: 0,
            faulty_count: 0,
            finalized: false,
        }
    }

    /// Request one slice from `backend` and append it as `InProgress`.
    ///
    /// The outer `Result` carries invariant violations; the inner one the
    /// backend's allocation failure, which leaves the registry untouched.
    pub fn allocate_slice<B>(&mut self, backend: &mut B) -> Result<std::result::Result<usize, BackendFault>>
    where
        B: DeviceMemory<Handle = H>,
    {
        if self.finalized {
            return Err(LockError::invariant("allocation requested on a finalized registry"));
        }
        match backend.allocate(self.slice_bytes) {
            Ok(handle) => {
                let index = self.slices.len();
                self.slices.push(Slice::new(handle));
                debug!(index, bytes = self.slice_bytes, "slice allocated");
                Ok(Ok(index))
            }
            Err(fault) => Ok(Err(fault)),
        }
    }

    /// Record the verification outcome of slice `index`.
    pub fn mark(&mut self, index: usize, outcome: Outcome) -> Result<()> {
        if self.finalized {
            return Err(LockError::invariant(format!("mark({index}) on a finalized registry")));
        }
        let len = self.slices.len();
        let slice = self.slices.get_mut(index).ok_or_else(|| {
            LockError::invariant(format!("mark: slice index {index} out of range (len = {len})"))
        })?;
        if slice.state != SliceState::InProgress {
            return Err(LockError::invariant(format!(
                "mark: slice {index} is {} and cannot be marked {:?}",
                slice.state, outcome
            )));
        }
        slice.state = outcome.into();
        match outcome {
            Outcome::Verified => self.verified_count += 1,
            Outcome::Faulty => self.faulty_count += 1,
        }
        Ok(())
    }

    /// Free every slice that is not `Faulty`, then finalize the registry.
    ///
    /// Returns the number of slices released. Must run exactly once.
    pub fn reclaim_non_faulty<B>(&mut self, backend: &mut B) -> Result<usize>
    where
        B: DeviceMemory<Handle = H>,
    {
        if self.finalized {
            return Err(LockError::invariant("reclaim_non_faulty called twice"));
        }
        // Set first so a failed free cannot be followed by a second pass.
        self.finalized = true;
        let mut released = 0;
        for (index, slice) in self.slices.iter_mut().enumerate() {
            if slice.state == SliceState::Faulty {
                continue;
            }
            if let Some(handle) = slice.handle.take() {
                backend.free(handle)?;
                released += 1;
            }
            slice.state = SliceState::Released;
            debug!(index, "slice released");
        }
        info!(released, kept = self.faulty_count, "registry finalized");
        Ok(released)
    }

    pub fn slice_bytes(&self) -> usize {
        self.slice_bytes
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slice<H>> {
        self.slices.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice<H>> {
        self.slices.iter()
    }

    /// Number of slices currently in `state`.
    pub fn count(&self, state: SliceState) -> usize {
        self.slices.iter().filter(|s| s.state == state).count()
    }

    /// Number of slices that still own device memory.
    pub fn held_count(&self) -> usize {
        self.slices.iter().filter(|s| s.is_held()).count()
    }

    /// Slices ever marked `Verified`, including those released since.
    pub fn verified_count(&self) -> usize {
        self.verified_count
    }

    pub fn faulty_count(&self) -> usize {
        self.faulty_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn handle(&self, index: usize) -> Result<&H> {
        self.slices
            .get(index)
            .and_then(Slice::handle)
            .ok_or_else(|| LockError::invariant(format!("slice {index} has no live handle")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimulatedMemory;

    const SLICE: usize = 64;

    fn allocate(reg: &mut Registry<u64>, mem: &mut SimulatedMemory) -> usize {
        reg.allocate_slice(mem).unwrap().expect("simulated allocation")
    }

    #[test]
    fn allocate_appends_in_progress_slices() {
        let mut mem = SimulatedMemory::new(4);
        let mut reg = Registry::new(SLICE);
        assert_eq!(allocate(&mut reg, &mut mem), 0);
        assert_eq!(allocate(&mut reg, &mut mem), 1);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.count(SliceState::InProgress), 2);
    }

    #[test]
    fn allocation_failure_leaves_registry_untouched() {
        let mut mem = SimulatedMemory::new(1);
        let mut reg = Registry::new(SLICE);
        allocate(&mut reg, &mut mem);
        let fault = reg.allocate_slice(&mut mem).unwrap().unwrap_err();
        assert_eq!(fault.name, "OUT_OF_MEMORY");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn mark_updates_state_and_counters() {
        let mut mem = SimulatedMemory::new(4);
        let mut reg = Registry::new(SLICE);
        let a = allocate(&mut reg, &mut mem);
        let b = allocate(&mut reg, &mut mem);
        reg.mark(a, Outcome::Verified).unwrap();
        reg.mark(b, Outcome::Faulty).unwrap();
        assert_eq!(reg.verified_count(), 1);
        assert_eq!(reg.faulty_count(), 1);
        assert_eq!(reg.get(b).unwrap().state(), SliceState::Faulty);
    }

    #[test]
    fn mark_twice_is_an_invariant_violation() {
        let mut mem = SimulatedMemory::new(4);
        let mut reg = Registry::new(SLICE);
        let a = allocate(&mut reg, &mut mem);
        reg.mark(a, Outcome::Faulty).unwrap();
        let err = reg.mark(a, Outcome::Verified).unwrap_err();
        assert!(matches!(err, LockError::Invariant(_)));
        assert_eq!(reg.get(a).unwrap().state(), SliceState::Faulty);
    }

    #[test]
    fn mark_out_of_range_is_an_invariant_violation() {
        let mut reg: Registry<u64> = Registry::new(SLICE);
        let err = reg.mark(0, Outcome::Verified).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn reclaim_frees_everything_but_faulty() {
        let mut mem = SimulatedMemory::new(8);
        let mut reg = Registry::new(SLICE);
        for i in 0..4 {
            let idx = allocate(&mut reg, &mut mem);
            let outcome = if i == 2 { Outcome::Faulty } else { Outcome::Verified };
            reg.mark(idx, outcome).unwrap();
        }

        let released = reg.reclaim_non_faulty(&mut mem).unwrap();

        assert_eq!(released, 3);
        assert!(reg.is_finalized());
        assert_eq!(reg.count(SliceState::Released), 3);
        assert_eq!(reg.held_count(), 1);
        let faulty = *reg.get(2).unwrap().handle().unwrap();
        assert!(mem.is_live(faulty));
        assert_eq!(mem.live_count(), 1);
    }

    #[test]
    fn finalized_registry_rejects_mutation() {
        let mut mem = SimulatedMemory::new(8);
        let mut reg = Registry::new(SLICE);
        let idx = allocate(&mut reg, &mut mem);
        reg.reclaim_non_faulty(&mut mem).unwrap();

        assert!(reg.allocate_slice(&mut mem).is_err());
        assert!(reg.mark(idx, Outcome::Verified).is_err());
        assert!(reg.reclaim_non_faulty(&mut mem).is_err());
        assert_eq!(reg.get(idx).unwrap().state(), SliceState::Released);
    }

    #[test]
    fn failed_free_is_fatal_and_not_retried() {
        let mut mem = SimulatedMemory::new(8).with_failing_free(1);
        let mut reg = Registry::new(SLICE);
        for _ in 0..3 {
            let idx = allocate(&mut reg, &mut mem);
            reg.mark(idx, Outcome::Verified).unwrap();
        }

        let err = reg.reclaim_non_faulty(&mut mem).unwrap_err();
        assert!(matches!(err, LockError::Backend(ref f) if f.operation == "simFree"));
        assert!(reg.is_finalized());
        assert!(matches!(reg.reclaim_non_faulty(&mut mem), Err(LockError::Invariant(_))));
    }
}
