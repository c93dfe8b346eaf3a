//! Syscall dispatch for the lifecycle syscalls.

use axerrno::{LinuxError, LinuxResult};
use kestrel_api::imp::task::*;
use kestrel_api::interface::task::*;
use kestrel_core::Kernel;
use kestrel_process::WaitInfo;
use memory_addr::VirtAddr;
use syscalls::Sysno;

/// Raw syscall arguments, in register order.
pub type SyscallArgs = [usize; 6];

/// Runs syscall `syscall_num` for the current thread and returns the value
/// for the user's return register: the result, or a negated errno.
pub fn handle_syscall(kernel: &Kernel, syscall_num: usize, args: SyscallArgs) -> isize {
    let Ok(raw_sysno) = u32::try_from(syscall_num) else {
        return stub_unimplemented(syscall_num).unwrap_or_else(|err| -err.code() as _);
    };
    let sysno = Sysno::from(raw_sysno);
    trace!("[syscall] <{:?}> begin", sysno);
    let result: LinuxResult<isize> = match sysno {
        Sysno::getpid => sys_getpid(kernel),
        Sysno::getppid => sys_getppid(kernel),
        Sysno::gettid => sys_gettid(kernel),
        Sysno::exit => sys_exit(kernel, args[0] as _),
        Sysno::exit_group => sys_exit_group(kernel, args[0] as _),
        Sysno::kill => sys_kill(kernel, args[0] as _, args[1] as _),
        Sysno::tkill => sys_tkill(kernel, args[0] as _, args[1] as _),
        Sysno::tgkill => sys_tgkill(kernel, args[0] as _, args[1] as _, args[2] as _),
        Sysno::wait4 => wait4(kernel, args[0] as _, args[1].into(), args[2] as _),
        Sysno::waitid => waitid(kernel, args[0] as _, args[1] as _, args[2].into(), args[3] as _),
        _ => stub_unimplemented(syscall_num),
    };
    let ans = result.unwrap_or_else(|err| -err.code() as _);
    trace!("[syscall] <{:?}> return {}", sysno, ans);
    ans
}

fn copy_out(kernel: &Kernel, address: VirtAddr, bytes: &[u8]) -> LinuxResult<()> {
    if kernel.collaborators().user_memory.copy_to_user(address, bytes) {
        Ok(())
    } else {
        Err(LinuxError::EFAULT)
    }
}

fn wait4(kernel: &Kernel, pid: i32, status: VirtAddr, options: u32) -> LinuxResult<isize> {
    let (pid, word) = sys_wait4(kernel, pid, options)?;
    if pid != 0 && status.as_usize() != 0 {
        copy_out(kernel, status, &word.to_ne_bytes())?;
    }
    Ok(pid as _)
}

/// Leading fields of a `siginfo_t` for `SIGCHLD`, as laid out on 64-bit
/// targets: signo, errno, code, padding, then pid, uid and status.
fn siginfo_bytes(info: &WaitInfo) -> [u8; 28] {
    let fields = [
        info.signo as i32,
        0,
        info.code as i32,
        0,
        info.pid as i32,
        info.uid as i32,
        info.status,
    ];
    let mut bytes = [0; 28];
    for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
        chunk.copy_from_slice(&field.to_ne_bytes());
    }
    bytes
}

fn waitid(kernel: &Kernel, idtype: u32, id: u32, infop: VirtAddr, options: u32) -> LinuxResult<isize> {
    let info = sys_waitid(kernel, idtype, id, options)?;
    if infop.as_usize() != 0 {
        match info {
            Some(info) => copy_out(kernel, infop, &siginfo_bytes(&info))?,
            None => copy_out(kernel, infop, &[0; 28])?,
        }
    }
    Ok(0)
}

fn stub_unimplemented(syscall_num: usize) -> LinuxResult<isize> {
    match u32::try_from(syscall_num) {
        Ok(raw) => warn!("Unimplemented syscall: {:?}, ENOSYS", Sysno::from(raw)),
        Err(_) => warn!("Unimplemented syscall: {:#x}, ENOSYS", syscall_num),
    }
    Err(LinuxError::ENOSYS)
}
