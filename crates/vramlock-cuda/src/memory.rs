//! Device allocations on a CUDA context.

use std::panic::{self, UnwindSafe};
use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaSlice, CudaStream, DevicePtr, DriverError, result};
use tracing::{debug, info, warn};
use vramlock_core::{BackendFault, DeviceMemory, LockError};

/// Translate a driver error into the backend-neutral fault type.
///
/// The name comes from the `CUresult` variant itself, so no driver call is
/// needed to describe a driver failure.
pub(crate) fn driver_fault(operation: &str, err: DriverError) -> BackendFault {
    BackendFault::new(operation, format!("{:?}", err.0), err.0 as i64)
}

/// Run `f`, turning a panic into `None` without the panic message reaching
/// stderr.
fn quietly<T>(f: impl FnOnce() -> T + UnwindSafe) -> Option<T> {
    let hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let result = panic::catch_unwind(f);
    panic::set_hook(hook);
    result.ok()
}

/// One CUDA context and its default stream.
pub struct CudaMemory {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    name: String,
}

impl CudaMemory {
    /// Initialise the driver and create a context on `device_index`.
    pub fn open(device_index: u32) -> Result<Self, LockError> {
        // cudarc panics when libcuda cannot be loaded at all.
        let count = match quietly(CudaContext::device_count) {
            Some(count) => count.map_err(|e| driver_fault("cuDeviceGetCount", e))?,
            None => {
                warn!("CUDA driver library could not be loaded");
                return Err(LockError::NoDevices { backend: "CUDA" });
            }
        };
        if count <= 0 {
            return Err(LockError::NoDevices { backend: "CUDA" });
        }
        let count = count as u32;
        if device_index >= count {
            return Err(LockError::InvalidDevice { index: device_index, count });
        }

        let ctx = CudaContext::new(device_index as usize).map_err(|e| driver_fault("cuCtxCreate", e))?;
        let name = ctx.name().unwrap_or_default();
        let stream = ctx.default_stream();
        info!(device_index, name = %name, "CUDA context created");

        Ok(Self { _ctx: ctx, stream, name })
    }

    fn synchronize(&self, operation: &str) -> Result<(), BackendFault> {
        self.stream.synchronize().map_err(|e| driver_fault(operation, e))
    }
}

impl DeviceMemory for CudaMemory {
    type Handle = CudaSlice<u8>;

    fn device_name(&self) -> &str {
        &self.name
    }

    fn allocate(&mut self, size: usize) -> Result<CudaSlice<u8>, BackendFault> {
        // Contents are written by `fill` before anything reads them.
        let slice = unsafe { self.stream.alloc::<u8>(size) }.map_err(|e| driver_fault("cuMemAlloc", e))?;
        self.synchronize("cuMemAlloc")?;
        debug!(size, "CUDA slice allocated");
        Ok(slice)
    }

    fn free(&mut self, handle: CudaSlice<u8>) -> Result<(), BackendFault> {
        // cudarc frees on drop; a failed free surfaces on the next synchronize.
        drop(handle);
        self.synchronize("cuMemFree")
    }

    fn fill(&mut self, handle: &CudaSlice<u8>, pattern: u8) -> Result<(), BackendFault> {
        {
            let (ptr, _sync) = handle.device_ptr(&self.stream);
            unsafe { result::memset_d8_async(ptr, pattern, handle.len(), self.stream.cu_stream()) }
                .map_err(|e| driver_fault("cuMemsetD8", e))?;
        }
        self.synchronize("cuMemsetD8")
    }

    fn read_to_host(&mut self, handle: &CudaSlice<u8>, dest: &mut [u8]) -> Result<(), BackendFault> {
        self.stream.memcpy_dtoh(handle, dest).map_err(|e| driver_fault("cuMemcpyDtoH", e))?;
        self.synchronize("cuMemcpyDtoH")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cudarc::driver::sys::CUresult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn driver_fault_uses_result_name_and_code() {
        let fault = driver_fault("cuMemAlloc", DriverError(CUresult::CUDA_ERROR_OUT_OF_MEMORY));
        assert_eq!(fault.operation, "cuMemAlloc");
        assert_eq!(fault.name, "CUDA_ERROR_OUT_OF_MEMORY");
        assert_eq!(fault.code, 2);
    }

    static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn quietly_swallows_panic_and_restores_hook() {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(|_| {
            HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(quietly(|| 7), Some(7));
        assert_eq!(quietly(|| -> i32 { panic!("libcuda.so: cannot open shared object file") }), None);
        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 0);

        fn after() {
            panic!("after");
        }
        let _ = panic::catch_unwind(after);
        assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);

        panic::set_hook(previous);
    }
}
