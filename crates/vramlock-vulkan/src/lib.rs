//! `vramlock-vulkan`: Vulkan backend for vram-lock.
//!
//! Slices are device-local buffers, each with a dedicated memory allocation.
//! Fills use `vkCmdFillBuffer`; readbacks copy into a host-visible staging
//! buffer. Every command buffer is submitted to one queue and waited on with a
//! fence before the call returns.

pub mod buffer;
pub mod context;
pub mod error;
mod memory;

pub use buffer::{BufferUsage, DeviceBuffer};
pub use error::VulkanError;
pub use memory::{VulkanMemory, fill_word};
