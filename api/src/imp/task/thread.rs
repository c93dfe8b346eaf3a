use axerrno::LinuxResult;
use kestrel_core::Kernel;
use syscall_trace::syscall_trace;

#[syscall_trace]
pub fn sys_getpid(kernel: &Kernel) -> LinuxResult<isize> {
    Ok(kernel.current_process()?.get_pid() as _)
}

/// 0 once the parent is gone; orphans are not reparented.
#[syscall_trace]
pub fn sys_getppid(kernel: &Kernel) -> LinuxResult<isize> {
    let ppid = kernel.current_process()?.get_ppid();
    Ok(match kernel.processes().get(ppid) {
        Some(parent) => parent.get_pid() as _,
        None => 0,
    })
}

#[syscall_trace]
pub fn sys_gettid(kernel: &Kernel) -> LinuxResult<isize> {
    Ok(kernel.current_thread()?.get_tid() as _)
}
