use alloc::string::String;
use axerrno::{LinuxError, LinuxResult};
use kestrel_core::Kernel;
use linux_raw_sys::general::PATH_MAX;
use memory_addr::VirtAddr;

/// Copies a path argument of `len` bytes out of user memory.
pub fn get_syscall_path_argument(kernel: &Kernel, path: VirtAddr, len: usize) -> LinuxResult<String> {
    if len == 0 {
        return Err(LinuxError::EINVAL);
    }
    if len > PATH_MAX as usize {
        return Err(LinuxError::ENAMETOOLONG);
    }
    kernel
        .collaborators()
        .user_memory
        .copy_string_from_user(path, len)
        .ok_or(LinuxError::EFAULT)
}
