//! Host-memory stand-in for a device.
//!
//! [`SimulatedMemory`] behaves like a device with room for a fixed number of
//! slices. Individual allocation ordinals can be made unstable (the second and
//! later readbacks differ from the first) or stuck (fills are ignored), and
//! their fill or free can be made to fail outright, which is enough to drive
//! every path of the session without hardware.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::backend::DeviceMemory;
use crate::error::BackendFault;

/// Simulated device. Handles are allocation ordinals (`0, 1, 2, ...`).
#[derive(Debug, Default)]
pub struct SimulatedMemory {
    capacity: usize,
    next_ordinal: u64,
    cells: BTreeMap<u64, Cell>,
    freed: Vec<u64>,
    unstable: BTreeSet<u64>,
    stuck: BTreeSet<u64>,
    failing_fill: BTreeSet<u64>,
    failing_free: BTreeSet<u64>,
}

#[derive(Debug)]
struct Cell {
    bytes: Vec<u8>,
    reads: usize,
}

impl SimulatedMemory {
    /// A device that can hold `capacity` live slices at once.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }

    /// A device that never runs out of memory.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Readbacks of allocation `ordinal` disagree after the first one.
    pub fn with_unstable(mut self, ordinal: u64) -> Self {
        self.unstable.insert(ordinal);
        self
    }

    /// Allocation `ordinal` ignores fills and keeps reading back zeros.
    pub fn with_stuck(mut self, ordinal: u64) -> Self {
        self.stuck.insert(ordinal);
        self
    }

    /// Filling allocation `ordinal` fails.
    pub fn with_failing_fill(mut self, ordinal: u64) -> Self {
        self.failing_fill.insert(ordinal);
        self
    }

    /// Freeing allocation `ordinal` fails and leaves it allocated.
    pub fn with_failing_free(mut self, ordinal: u64) -> Self {
        self.failing_free.insert(ordinal);
        self
    }

    pub fn is_live(&self, handle: u64) -> bool {
        self.cells.contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.cells.len()
    }

    /// Handles in the order they were freed.
    pub fn freed(&self) -> &[u64] {
        &self.freed
    }

    /// Number of readbacks issued against `handle` so far.
    pub fn reads_of(&self, handle: u64) -> usize {
        self.cells.get(&handle).map_or(0, |c| c.reads)
    }

    fn cell_mut(&mut self, handle: u64, operation: &str) -> Result<&mut Cell, BackendFault> {
        self.cells
            .get_mut(&handle)
            .ok_or_else(|| BackendFault::new(operation, "INVALID_HANDLE", 400))
    }
}

impl DeviceMemory for SimulatedMemory {
    type Handle = u64;

    fn device_name(&self) -> &str {
        "Simulated Device"
    }

    fn allocate(&mut self, size: usize) -> Result<u64, BackendFault> {
        if self.cells.len() >= self.capacity {
            return Err(BackendFault::new("simAlloc", "OUT_OF_MEMORY", 2));
        }
        let handle = self.next_ordinal;
        self.next_ordinal += 1;
        self.cells.insert(handle, Cell { bytes: vec![0; size], reads: 0 });
        trace!(handle, size, "simulated allocation");
        Ok(handle)
    }

    fn free(&mut self, handle: u64) -> Result<(), BackendFault> {
        if self.failing_free.contains(&handle) {
            return Err(BackendFault::new("simFree", "ILLEGAL_ADDRESS", 700));
        }
        self.cells
            .remove(&handle)
            .ok_or_else(|| BackendFault::new("simFree", "INVALID_HANDLE", 400))?;
        self.freed.push(handle);
        Ok(())
    }

    fn fill(&mut self, handle: &u64, pattern: u8) -> Result<(), BackendFault> {
        if self.failing_fill.contains(handle) {
            return Err(BackendFault::new("simFill", "ILLEGAL_ADDRESS", 700));
        }
        let stuck = self.stuck.contains(handle);
        let cell = self.cell_mut(*handle, "simFill")?;
        if !stuck {
            cell.bytes.fill(pattern);
        }
        Ok(())
    }

    fn read_to_host(&mut self, handle: &u64, dest: &mut [u8]) -> Result<(), BackendFault> {
        let unstable = self.unstable.contains(handle);
        let cell = self.cell_mut(*handle, "simRead")?;
        if dest.len() != cell.bytes.len() {
            return Err(BackendFault::new("simRead", "INVALID_VALUE", 1));
        }
        dest.copy_from_slice(&cell.bytes);
        if unstable && cell.reads > 0 && !dest.is_empty() {
            let mid = dest.len() / 2;
            dest[mid] ^= 0xFF;
        }
        cell.reads += 1;
        Ok(())
    }
}
