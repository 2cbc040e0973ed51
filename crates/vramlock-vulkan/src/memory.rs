//! [`DeviceMemory`] over plain Vulkan buffers.

use ash::vk;
use tracing::debug;
use vramlock_core::{BackendFault, DeviceMemory, LockError};

use crate::buffer::{BufferUsage, DeviceBuffer, allocate_buffer};
use crate::context::DeviceContext;
use crate::error::{Result, VulkanError};

/// Host-visible readback buffer, mapped for its whole lifetime.
struct Staging {
    buffer: DeviceBuffer,
    mapped: *mut u8,
    coherent: bool,
}

fn create_staging(ctx: &DeviceContext, size: vk::DeviceSize) -> Result<Staging> {
    let device = &ctx.device;
    let props = &ctx.memory_properties;
    let (buffer, coherent) = match allocate_buffer(device, props, size, BufferUsage::Staging) {
        Ok(buffer) => (buffer, true),
        Err(e) => {
            debug!(error = %e, "no coherent staging memory, falling back to non-coherent");
            (allocate_buffer(device, props, size, BufferUsage::StagingNonCoherent)?, false)
        }
    };

    let mapped = match unsafe {
        device.map_memory(buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
    } {
        Ok(ptr) => ptr.cast::<u8>(),
        Err(r) => {
            unsafe { buffer.destroy(device) };
            return Err(VulkanError::api("vkMapMemory")(r));
        }
    };
    Ok(Staging { buffer, mapped, coherent })
}

/// One Vulkan device serving slice allocations.
///
/// Every slice is a device-local buffer with its own memory allocation.
/// Readbacks copy through a single slice-sized staging buffer created when
/// the device is opened.
pub struct VulkanMemory {
    staging: Staging,
    ctx: DeviceContext,
}

impl VulkanMemory {
    /// Open physical device `device_index` for slices of `slice_bytes`.
    pub fn open(device_index: u32, slice_bytes: usize) -> std::result::Result<Self, LockError> {
        let ctx = DeviceContext::open(device_index)?;
        let staging = create_staging(&ctx, slice_bytes as vk::DeviceSize)?;
        debug!(slice_bytes, coherent = staging.coherent, "staging buffer mapped");
        Ok(Self { staging, ctx })
    }

    fn copy_to_host(&self, handle: &DeviceBuffer, dest: &mut [u8]) -> Result<()> {
        let size = dest.len() as vk::DeviceSize;
        let staging = &self.staging;
        if size > staging.buffer.size {
            return Err(VulkanError::StagingTooSmall { requested: size, capacity: staging.buffer.size });
        }
        let src = handle.buffer;
        let dst = staging.buffer.buffer;

        self.ctx.submit_and_wait(|device, cmd| unsafe {
            let before = transfer_barrier(src, vk::AccessFlags::TRANSFER_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[before],
                &[],
            );
            device.cmd_copy_buffer(cmd, src, dst, &[vk::BufferCopy::default().size(size)]);
            let after = transfer_barrier(dst, vk::AccessFlags::HOST_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[after],
                &[],
            );
        })?;

        if !staging.coherent {
            let range = vk::MappedMemoryRange::default()
                .memory(staging.buffer.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            unsafe { self.ctx.device.invalidate_mapped_memory_ranges(&[range]) }
                .map_err(VulkanError::api("vkInvalidateMappedMemoryRanges"))?;
        }

        // SAFETY: the mapping covers at least `dest.len()` bytes and the fence
        // wait above ordered the copy before this read.
        let mapped = unsafe { std::slice::from_raw_parts(staging.mapped, dest.len()) };
        dest.copy_from_slice(mapped);
        Ok(())
    }
}

/// Make prior transfer writes to `buffer` visible to `dst_access`.
fn transfer_barrier(buffer: vk::Buffer, dst_access: vk::AccessFlags) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// `vkCmdFillBuffer` takes a 32-bit word; replicate the byte into all four lanes.
pub fn fill_word(pattern: u8) -> u32 {
    u32::from_ne_bytes([pattern; 4])
}

impl DeviceMemory for VulkanMemory {
    type Handle = DeviceBuffer;

    fn device_name(&self) -> &str {
        &self.ctx.name
    }

    fn allocate(&mut self, size: usize) -> std::result::Result<DeviceBuffer, BackendFault> {
        let buffer = allocate_buffer(
            &self.ctx.device,
            &self.ctx.memory_properties,
            size as vk::DeviceSize,
            BufferUsage::Slice,
        )?;
        Ok(buffer)
    }

    fn free(&mut self, handle: DeviceBuffer) -> std::result::Result<(), BackendFault> {
        // SAFETY: every submission is waited on, so nothing still references it.
        unsafe { handle.destroy(&self.ctx.device) };
        Ok(())
    }

    fn fill(&mut self, handle: &DeviceBuffer, pattern: u8) -> std::result::Result<(), BackendFault> {
        let buffer = handle.buffer;
        let word = fill_word(pattern);
        self.ctx.submit_and_wait(|device, cmd| unsafe {
            device.cmd_fill_buffer(cmd, buffer, 0, vk::WHOLE_SIZE, word);
            let barrier = transfer_barrier(buffer, vk::AccessFlags::TRANSFER_READ);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        })?;
        Ok(())
    }

    fn read_to_host(
        &mut self,
        handle: &DeviceBuffer,
        dest: &mut [u8],
    ) -> std::result::Result<(), BackendFault> {
        Ok(self.copy_to_host(handle, dest)?)
    }
}

impl Drop for VulkanMemory {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.unmap_memory(self.staging.buffer.memory);
            self.staging.buffer.destroy(&self.ctx.device);
        }
    }
}
