use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use kestrel_core::Kernel;
use kestrel_process::{ChildStateChange, Pid, Process, WaitInfo, WaitOptions};
use linux_raw_sys::general::{P_ALL, P_PID};
use syscall_trace::syscall_trace;

#[derive(Debug, Clone, Copy)]
enum WaitPid {
    /// Wait for any child process
    Any,
    /// Wait for the child whose process ID is equal to the value.
    Pid(Pid),
}

impl WaitPid {
    fn apply(&self, child: &Process) -> bool {
        match self {
            WaitPid::Any => true,
            WaitPid::Pid(pid) => child.get_pid() == *pid,
        }
    }
}

/// Blocks until a child selected by `pid` reports a change wanted by
/// `options`, and consumes it unless `WNOWAIT` is set.
///
/// A reaped child leaves the caller's children, so any other waiter for it
/// sees `ECHILD`. Returns `None` under `WNOHANG` when nothing is pending.
fn wait_child(
    kernel: &Kernel,
    pid: WaitPid,
    options: WaitOptions,
) -> LinuxResult<Option<(Arc<Process>, ChildStateChange)>> {
    let thread = kernel.current_thread()?;
    let process = thread.get_process().ok_or(LinuxError::ESRCH)?;
    let has_child = || process.get_children().iter().any(|child| pid.apply(child));
    if !has_child() {
        return Err(LinuxError::ECHILD);
    }

    let condition = process.wait_condition();
    loop {
        if let Some((child, change)) = condition.try_take(|child| pid.apply(child), options) {
            if change.is_terminated() && !options.contains(WaitOptions::WNOWAIT) {
                process.remove_child(child.get_pid());
                // other waiters for this child must notice it is gone
                condition.notify_all();
            }
            return Ok(Some((child, change)));
        } else if options.contains(WaitOptions::WNOHANG) {
            return Ok(None);
        }

        condition.wait_until(&mut || {
            thread.should_die()
                || !has_child()
                || condition.has_pending(|child| pid.apply(child), options)
        });
        if thread.should_die() {
            return Err(LinuxError::EINTR);
        }
        if !has_child() {
            return Err(LinuxError::ECHILD);
        }
    }
}

/// Returns the child's pid and its status word, or `(0, 0)` under `WNOHANG`
/// when no selected child has changed state.
#[syscall_trace]
pub fn sys_wait4(kernel: &Kernel, pid: i32, options: u32) -> LinuxResult<(Pid, i32)> {
    let options = WaitOptions::from_bits_truncate(options) | WaitOptions::WEXITED;
    let pid = if pid == -1 {
        WaitPid::Any
    } else if pid > 0 {
        WaitPid::Pid(pid as _)
    } else {
        return Err(LinuxError::EINVAL);
    };

    Ok(match wait_child(kernel, pid, options)? {
        Some((child, change)) => (child.get_pid(), WaitInfo::new(&child, change).status_word()),
        None => (0, 0),
    })
}

#[syscall_trace]
pub fn sys_waitid(
    kernel: &Kernel,
    idtype: u32,
    id: u32,
    options: u32,
) -> LinuxResult<Option<WaitInfo>> {
    let options = WaitOptions::from_bits_truncate(options);
    if !options.intersects(WaitOptions::WEXITED | WaitOptions::WUNTRACED | WaitOptions::WCONTINUED) {
        return Err(LinuxError::EINVAL);
    }
    let pid = match idtype {
        P_ALL => WaitPid::Any,
        P_PID => WaitPid::Pid(id),
        _ => return Err(LinuxError::EINVAL),
    };

    Ok(wait_child(kernel, pid, options)?.map(|(child, change)| WaitInfo::new(&child, change)))
}
