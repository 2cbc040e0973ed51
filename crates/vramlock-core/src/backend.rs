//! The device-memory capability every backend provides.
//!
//! Bring-up (enumerating devices, creating a context, picking a queue or
//! stream) is each backend's constructor; once a value implementing
//! [`DeviceMemory`] exists the session only ever needs the five primitives
//! below. All of them are synchronous: when a call returns, the device work
//! it issued has completed.

use crate::error::BackendFault;

/// Synchronous allocate/free/fill/readback over one device.
pub trait DeviceMemory {
    /// Backend-owned resource identifying one allocation.
    ///
    /// Ownership of a handle is the ownership of the device memory behind it:
    /// the registry moves a handle back into [`DeviceMemory::free`] exactly once.
    type Handle;

    /// Human-readable device identity, for display only.
    fn device_name(&self) -> &str;

    /// Allocate `size` bytes of device memory.
    ///
    /// Any error is treated by the session as exhaustion.
    fn allocate(&mut self, size: usize) -> Result<Self::Handle, BackendFault>;

    /// Release an allocation.
    fn free(&mut self, handle: Self::Handle) -> Result<(), BackendFault>;

    /// Fill the entire allocation with `pattern`.
    fn fill(&mut self, handle: &Self::Handle, pattern: u8) -> Result<(), BackendFault>;

    /// Copy the entire allocation into `dest`.
    ///
    /// `dest.len()` equals the size the handle was allocated with.
    fn read_to_host(&mut self, handle: &Self::Handle, dest: &mut [u8]) -> Result<(), BackendFault>;
}
