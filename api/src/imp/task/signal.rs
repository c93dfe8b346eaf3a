use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use kestrel_core::Kernel;
use kestrel_process::{Pid, Process, Signo, Thread};
use syscall_trace::syscall_trace;

fn parse_signo(signo: u32) -> LinuxResult<Signo> {
    Signo::from_raw(signo).ok_or(LinuxError::EINVAL)
}

/// `None` for signal 0, which only checks that the target exists.
fn make_signal(signo: u32) -> LinuxResult<Option<Signo>> {
    if signo == 0 {
        return Ok(None);
    }
    parse_signo(signo).map(Some)
}

fn check_permission(sender: &Process, target: &Process) -> LinuxResult<()> {
    if target.is_kernel_process() && !sender.is_kernel_process() {
        return Err(LinuxError::EPERM);
    }
    if sender.is_superuser() || sender.uid() == target.uid() || sender.euid() == target.uid() {
        Ok(())
    } else {
        Err(LinuxError::EPERM)
    }
}

pub fn send_signal_process(
    kernel: &Kernel,
    sender: &Process,
    pid: Pid,
    sig: Option<Signo>,
) -> LinuxResult<()> {
    let target = kernel.processes().get(pid).ok_or(LinuxError::ESRCH)?;
    check_permission(sender, &target)?;
    match sig {
        Some(signo) => {
            info!("[signal] send {:?} to process {}", signo, pid);
            kernel.send_signal(&target, signo, sender.get_pid())
        }
        None => Ok(()),
    }
}

pub fn send_signal_thread(
    kernel: &Kernel,
    sender: &Process,
    thread: &Arc<Thread>,
    sig: Option<Signo>,
) -> LinuxResult<()> {
    let target = thread.get_process().ok_or(LinuxError::ESRCH)?;
    check_permission(sender, &target)?;
    match sig {
        Some(signo) => {
            info!("[signal] send {:?} to thread {}", signo, thread.get_tid());
            kernel.send_signal_to_thread(thread, signo, sender.get_pid())
        }
        None if thread.is_dead() => Err(LinuxError::ESRCH),
        None => Ok(()),
    }
}

/// Sends `signo` to a process. `pid == -1` targets every user process but the
/// caller. Process groups are not supported.
#[syscall_trace]
pub fn sys_kill(kernel: &Kernel, pid: i32, signo: u32) -> LinuxResult<isize> {
    let sig = make_signal(signo)?;
    let current = kernel.current_process()?;

    match pid {
        1.. => send_signal_process(kernel, &current, pid as Pid, sig)?,
        -1 => {
            let mut delivered = 0usize;
            for process in kernel.processes().all_processes() {
                if process.is_kernel_process() || process.get_pid() == current.get_pid() {
                    continue;
                }
                delivered +=
                    send_signal_process(kernel, &current, process.get_pid(), sig).is_ok() as usize;
            }
            debug!("[signal] broadcast reached {} processes", delivered);
            if delivered == 0 {
                return Err(LinuxError::ESRCH);
            }
        }
        _ => return Err(LinuxError::EINVAL),
    }
    Ok(0)
}

#[syscall_trace]
pub fn sys_tkill(kernel: &Kernel, tid: i32, signo: u32) -> LinuxResult<isize> {
    if tid <= 0 {
        return Err(LinuxError::EINVAL);
    }
    let sig = make_signal(signo)?;
    let current = kernel.current_process()?;
    let thread = kernel
        .processes()
        .find_thread(tid as Pid)
        .ok_or(LinuxError::ESRCH)?;
    send_signal_thread(kernel, &current, &thread, sig)?;
    Ok(0)
}

#[syscall_trace]
pub fn sys_tgkill(kernel: &Kernel, tgid: i32, tid: i32, signo: u32) -> LinuxResult<isize> {
    if tgid <= 0 || tid <= 0 {
        return Err(LinuxError::EINVAL);
    }
    let sig = make_signal(signo)?;
    let current = kernel.current_process()?;
    let thread = check_thread(kernel, tid as Pid, tgid as Pid)?;
    send_signal_thread(kernel, &current, &thread, sig)?;
    Ok(0)
}

// the thread must belong to the thread group (process) `tgid`
fn check_thread(kernel: &Kernel, tid: Pid, tgid: Pid) -> LinuxResult<Arc<Thread>> {
    kernel
        .processes()
        .get(tgid)
        .and_then(|process| process.get_thread(tid))
        .ok_or(LinuxError::ESRCH)
}
