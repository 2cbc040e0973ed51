//! `vramlock-cuda`: CUDA driver-API backend for vram-lock.
//!
//! [`CudaMemory`] opens a context on one device and serves raw device
//! allocations through cudarc. Every operation is issued on the context's
//! default stream and synchronised before returning, so the session sees a
//! strictly sequential device.
//!
//! # Usage
//!
//! ```rust,no_run
//! use vramlock_core::DeviceMemory;
//! use vramlock_cuda::CudaMemory;
//!
//! let mut gpu = CudaMemory::open(0)?;
//! let slice = gpu.allocate(64 << 20)?;
//! gpu.fill(&slice, 0xA5)?;
//! gpu.free(slice)?;
//! # Ok::<(), vramlock_core::LockError>(())
//! ```

mod memory;

pub use memory::CudaMemory;
