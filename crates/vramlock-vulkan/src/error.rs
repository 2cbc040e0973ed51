//! Vulkan backend error types.

use ash::vk;
use thiserror::Error;
use vramlock_core::{BackendFault, LockError};

/// Errors raised by the Vulkan backend.
#[derive(Debug, Error)]
pub enum VulkanError {
    /// A Vulkan entry point returned a non-success `VkResult`.
    #[error("{operation} failed: {result:?}")]
    Api { operation: &'static str, result: vk::Result },

    #[error("no suitable memory type: {0}")]
    NoSuitableMemoryType(String),

    #[error("no queue family supports transfer, graphics or compute")]
    NoQueueFamily,

    #[error("readback of {requested} bytes exceeds the {capacity}-byte staging buffer")]
    StagingTooSmall { requested: u64, capacity: u64 },
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, VulkanError>;

impl VulkanError {
    /// `map_err` adapter that tags a `VkResult` with the call that produced it.
    pub fn api(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Api { operation, result }
    }
}

impl From<VulkanError> for BackendFault {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::Api { operation, result } => {
                BackendFault::new(operation, format!("{result:?}"), result.as_raw() as i64)
            }
            // Reported the way the driver reports an unsupported request.
            VulkanError::NoSuitableMemoryType(_) => BackendFault::new(
                "vkAllocateMemory",
                format!("{:?}", vk::Result::ERROR_FEATURE_NOT_PRESENT),
                vk::Result::ERROR_FEATURE_NOT_PRESENT.as_raw() as i64,
            ),
            VulkanError::NoQueueFamily => BackendFault::new(
                "vkGetPhysicalDeviceQueueFamilyProperties",
                "NO_SUITABLE_QUEUE_FAMILY",
                -1,
            ),
            VulkanError::StagingTooSmall { .. } => BackendFault::new(
                "vkCmdCopyBuffer",
                format!("{:?}", vk::Result::ERROR_VALIDATION_FAILED_EXT),
                vk::Result::ERROR_VALIDATION_FAILED_EXT.as_raw() as i64,
            ),
        }
    }
}

impl From<VulkanError> for LockError {
    fn from(err: VulkanError) -> Self {
        LockError::Backend(err.into())
    }
}
