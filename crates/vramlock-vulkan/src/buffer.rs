//! Device buffers and their backing memory.

use crate::error::{Result, VulkanError};
use ash::vk;
use tracing::debug;

/// Usage hint for buffer allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local buffer under test: fill destination and copy source.
    Slice,
    /// Host-visible, host-coherent readback target.
    Staging,
    /// Host-visible readback target that needs explicit invalidation.
    StagingNonCoherent,
}

impl BufferUsage {
    fn flags(self) -> (vk::BufferUsageFlags, vk::MemoryPropertyFlags) {
        match self {
            Self::Slice => (
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ),
            Self::Staging => (
                vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
            Self::StagingNonCoherent => {
                (vk::BufferUsageFlags::TRANSFER_DST, vk::MemoryPropertyFlags::HOST_VISIBLE)
            }
        }
    }
}

/// A buffer with its dedicated memory allocation.
///
/// The caller must call [`DeviceBuffer::destroy`] before dropping.
#[derive(Debug)]
pub struct DeviceBuffer {
    /// Raw Vulkan buffer handle.
    pub buffer: vk::Buffer,
    /// Backing device memory.
    pub memory: vk::DeviceMemory,
    /// Requested size in bytes.
    pub size: vk::DeviceSize,
}

impl DeviceBuffer {
    /// Destroy the buffer and free its memory.
    ///
    /// # Safety
    /// Must only be called once, with the device that created the buffer,
    /// and with no submitted work still referencing it.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Find a memory type index matching the requested properties.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required_flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let type_ok = (type_filter & (1 << i)) != 0;
        let flags_ok = memory_properties.memory_types[i as usize].property_flags & required_flags
            == required_flags;
        if type_ok && flags_ok {
            return Ok(i);
        }
    }
    Err(VulkanError::NoSuitableMemoryType(format!(
        "no memory type with filter={type_filter:#x} flags={required_flags:?}"
    )))
}

/// Create a buffer of `size` bytes and bind dedicated memory to it.
///
/// On any failure the partially created buffer and memory are released, so an
/// error never leaks device memory.
pub fn allocate_buffer(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: BufferUsage,
) -> Result<DeviceBuffer> {
    let (vk_usage, mem_flags) = usage.flags();

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk_usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(VulkanError::api("vkCreateBuffer"))?;

    let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type_index =
        match find_memory_type(memory_properties, mem_requirements.memory_type_bits, mem_flags) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(result) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(VulkanError::api("vkAllocateMemory")(result));
        }
    };

    if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.free_memory(memory, None);
            device.destroy_buffer(buffer, None);
        }
        return Err(VulkanError::api("vkBindBufferMemory")(result));
    }

    debug!(?usage, size, memory_type_index, "allocated buffer");

    Ok(DeviceBuffer { buffer, memory, size })
}
