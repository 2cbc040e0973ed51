//! Instance, logical device and the single queue every transfer runs on.

use ash::vk;
use tracing::{debug, info, warn};
use vramlock_core::LockError;

use crate::error::{Result, VulkanError};

/// Pick the queue family for transfers.
///
/// A family advertising `TRANSFER` wins; otherwise any graphics or compute
/// family, which implicitly supports transfer commands.
pub fn select_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let find = |wanted: vk::QueueFlags| {
        families.iter().position(|f| f.queue_count > 0 && f.queue_flags.intersects(wanted))
    };
    find(vk::QueueFlags::TRANSFER)
        .or_else(|| find(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
        .map(|i| i as u32)
}

/// Everything needed to record and submit one command buffer at a time.
pub struct DeviceContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    pub(crate) device: ash::Device,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    pub(crate) name: String,
}

impl DeviceContext {
    /// Load the loader, create an instance and open physical device `index`.
    pub fn open(index: u32) -> std::result::Result<Self, LockError> {
        // SAFETY: loads the system Vulkan loader; nothing else is touched.
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Vulkan loader could not be loaded");
                return Err(LockError::NoDevices { backend: "Vulkan" });
            }
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vram-lock")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        // SAFETY: create_info points to stack-local data for the duration of the call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::api("vkCreateInstance"))?;

        match Self::open_device(entry, instance, index) {
            Ok(ctx) => Ok(ctx),
            Err((instance, err)) => {
                // SAFETY: no child objects of the instance survive a failed open.
                unsafe { instance.destroy_instance(None) };
                Err(err)
            }
        }
    }

    fn open_device(
        entry: ash::Entry,
        instance: ash::Instance,
        index: u32,
    ) -> std::result::Result<Self, (ash::Instance, LockError)> {
        let physical = match unsafe { instance.enumerate_physical_devices() } {
            Ok(list) => list,
            Err(r) => return Err((instance, VulkanError::api("vkEnumeratePhysicalDevices")(r).into())),
        };
        if physical.is_empty() {
            return Err((instance, LockError::NoDevices { backend: "Vulkan" }));
        }
        let count = physical.len() as u32;
        let Some(&phys) = physical.get(index as usize) else {
            return Err((instance, LockError::InvalidDevice { index, count }));
        };

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(phys) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let Some(queue_family) = select_queue_family(&families) else {
            return Err((instance, VulkanError::NoQueueFamily.into()));
        };
        debug!(index, queue_family, device_count = count, "selected physical device");

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let device_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));

        let device = match unsafe { instance.create_device(phys, &device_info, None) } {
            Ok(device) => device,
            Err(r) => return Err((instance, VulkanError::api("vkCreateDevice")(r).into())),
        };

        match Self::create_submission_objects(&device, queue_family) {
            Ok((pool, cmd, fence)) => {
                let queue = unsafe { device.get_device_queue(queue_family, 0) };
                info!(index, name = %name, "Vulkan device opened");
                Ok(Self {
                    _entry: entry,
                    instance,
                    device,
                    memory_properties,
                    queue,
                    pool,
                    cmd,
                    fence,
                    name,
                })
            }
            Err(e) => {
                unsafe { device.destroy_device(None) };
                Err((instance, e.into()))
            }
        }
    }

    fn create_submission_objects(
        device: &ash::Device,
        queue_family: u32,
    ) -> Result<(vk::CommandPool, vk::CommandBuffer, vk::Fence)> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(VulkanError::api("vkCreateCommandPool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(r) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(VulkanError::api("vkAllocateCommandBuffers")(r));
            }
        };

        match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => Ok((pool, cmd, fence)),
            Err(r) => {
                unsafe { device.destroy_command_pool(pool, None) };
                Err(VulkanError::api("vkCreateFence")(r))
            }
        }
    }

    /// Record commands with `record`, submit them and block until the fence
    /// signals.
    pub fn submit_and_wait(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.cmd, &begin)
                .map_err(VulkanError::api("vkBeginCommandBuffer"))?;
            record(&self.device, self.cmd);
            self.device
                .end_command_buffer(self.cmd)
                .map_err(VulkanError::api("vkEndCommandBuffer"))?;
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::api("vkResetFences"))?;

            let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&self.cmd));
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), self.fence)
                .map_err(VulkanError::api("vkQueueSubmit"))?;
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(VulkanError::api("vkWaitForFences"))?;
            self.device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::api("vkResetCommandBuffer"))?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties { queue_flags: flags, queue_count: 1, ..Default::default() }
    }

    #[test]
    fn transfer_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(select_queue_family(&families), Some(1));
    }

    #[test]
    fn falls_back_to_compute_or_graphics() {
        let families = [family(vk::QueueFlags::SPARSE_BINDING), family(vk::QueueFlags::COMPUTE)];
        assert_eq!(select_queue_family(&families), Some(1));
    }

    #[test]
    fn no_usable_family() {
        assert_eq!(select_queue_family(&[family(vk::QueueFlags::SPARSE_BINDING)]), None);
        assert_eq!(select_queue_family(&[]), None);
    }

    #[test]
    fn empty_family_is_skipped() {
        let mut empty = family(vk::QueueFlags::TRANSFER);
        empty.queue_count = 0;
        assert_eq!(select_queue_family(&[empty, family(vk::QueueFlags::GRAPHICS)]), Some(1));
    }
}
