//! Error types shared by every vram-lock crate.

use thiserror::Error;

use crate::config::ConfigError;

/// A single backend operation that failed, described in the backend's own
/// vocabulary (e.g. `CUDA_ERROR_OUT_OF_MEMORY` / `2`,
/// `ERROR_OUT_OF_DEVICE_MEMORY` / `-2`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {name} ({code})")]
pub struct BackendFault {
    /// Native API call or logical step that failed (`cuMemAlloc`, `vkQueueSubmit`).
    pub operation: String,
    /// Symbolic name of the native error code.
    pub name: String,
    /// Raw native error code.
    pub code: i64,
}

impl BackendFault {
    pub fn new(operation: impl Into<String>, name: impl Into<String>, code: i64) -> Self {
        Self { operation: operation.into(), name: name.into(), code }
    }
}

/// Errors that end a vram-lock session.
///
/// Allocation failure inside the main loop is *not* represented here: it is the
/// expected way a session ends and is handled by the reclaimer.
#[derive(Debug, Error)]
pub enum LockError {
    /// A backend call failed outside the allocation step.
    #[error(transparent)]
    Backend(#[from] BackendFault),

    #[error("no {backend} devices found")]
    NoDevices { backend: &'static str },

    #[error("invalid device index {index} (device count = {count})")]
    InvalidDevice { index: u32, count: u32 },

    /// Internal consistency violation; the in-memory model can no longer be trusted.
    #[error("internal error: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("terminal output failed: {0}")]
    Terminal(#[from] std::io::Error),
}

impl LockError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_fault_display_names_operation_and_code() {
        let fault = BackendFault::new("cuMemsetD8", "CUDA_ERROR_ILLEGAL_ADDRESS", 700);
        assert_eq!(fault.to_string(), "cuMemsetD8 failed: CUDA_ERROR_ILLEGAL_ADDRESS (700)");
    }

    #[test]
    fn backend_error_is_transparent() {
        let err = LockError::from(BackendFault::new("vkQueueSubmit", "ERROR_DEVICE_LOST", -4));
        assert_eq!(err.to_string(), "vkQueueSubmit failed: ERROR_DEVICE_LOST (-4)");
    }

    #[test]
    fn invalid_device_display() {
        let err = LockError::InvalidDevice { index: 3, count: 1 };
        assert_eq!(err.to_string(), "invalid device index 3 (device count = 1)");
    }
}
