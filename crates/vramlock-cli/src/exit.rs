// Exit codes for the vram-lock binary
use vramlock_core::LockError;

pub const EXIT_SUCCESS: i32 = 0;
/// No devices, backend bring-up failure, fatal device error, internal error.
pub const EXIT_FAILURE: i32 = 1;
/// Bad arguments, bad configuration, device index out of range.
pub const EXIT_USAGE: i32 = 2;

/// Map a session error to the process exit code.
pub fn exit_code(err: &LockError) -> i32 {
    match err {
        LockError::InvalidDevice { .. } | LockError::Config(_) => EXIT_USAGE,
        LockError::Backend(_)
        | LockError::NoDevices { .. }
        | LockError::Invariant(_)
        | LockError::Terminal(_) => EXIT_FAILURE,
    }
}

/// Like [`exit_code`], looking through any `anyhow` context.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<LockError>().map_or(EXIT_FAILURE, exit_code)
}
