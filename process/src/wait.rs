//! Child state-change events and the per-process condition a parent waits on.

use crate::credentials::Uid;
use crate::process::Process;
use crate::signal::Signo;
use crate::Pid;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use linux_raw_sys::general::{
    __WALL, __WCLONE, __WNOTHREAD, CLD_CONTINUED, CLD_EXITED, CLD_KILLED, CLD_STOPPED,
    WCONTINUED, WEXITED, WNOHANG, WNOWAIT, WUNTRACED,
};
use spin::Mutex;

/// Something a thread can block on until a condition holds.
///
/// Implemented by the scheduler; [`SpinWaitQueue`] is a busy-waiting fallback.
pub trait WaitQueue: Send + Sync {
    /// Blocks the calling thread until `condition` returns true.
    ///
    /// `condition` is re-evaluated after every [`WaitQueue::notify_all`]. The
    /// caller must not hold any lock that `condition` takes.
    fn wait_until(&self, condition: &mut dyn FnMut() -> bool);

    fn notify_all(&self);
}

#[derive(Debug, Default)]
pub struct SpinWaitQueue;

impl WaitQueue for SpinWaitQueue {
    fn wait_until(&self, condition: &mut dyn FnMut() -> bool) {
        while !condition() {
            core::hint::spin_loop();
        }
    }

    fn notify_all(&self) {}
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        /// Do not block when there are no processes wishing to report status.
        const WNOHANG = WNOHANG;
        /// Report the status of selected processes which are stopped due to a
        /// `SIGTTIN`, `SIGTTOU`, `SIGTSTP`, or `SIGSTOP` signal.
        const WUNTRACED = WUNTRACED;
        /// Report the status of selected processes which have terminated.
        const WEXITED = WEXITED;
        /// Report the status of selected processes that have continued from a
        /// job control stop by receiving a `SIGCONT` signal.
        const WCONTINUED = WCONTINUED;
        /// Don't reap, just poll status.
        const WNOWAIT = WNOWAIT;

        /// Don't wait on children of other threads in this group
        const WNOTHREAD = __WNOTHREAD;
        /// Wait on all children, regardless of type
        const WALL = __WALL;
        /// Wait for "clone" children only.
        const WCLONE = __WCLONE;
    }
}

/// A state change of a child that its parent can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStateChange {
    /// The child is gone. `signal` is set when a signal killed it.
    Terminated { signal: Option<Signo> },
    Stopped(Signo),
    Continued,
}

impl ChildStateChange {
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    /// Whether a waiter passing `options` is interested in this change.
    pub fn wanted_by(self, options: WaitOptions) -> bool {
        match self {
            Self::Terminated { .. } => options.contains(WaitOptions::WEXITED),
            Self::Stopped(_) => options.contains(WaitOptions::WUNTRACED),
            Self::Continued => options.contains(WaitOptions::WCONTINUED),
        }
    }
}

struct WaitState {
    pending: Vec<(Arc<Process>, ChildStateChange)>,
    finalized: bool,
}

/// Pending state changes of a process's children.
///
/// Holds at most one record per child. A record is handed to exactly one
/// waiter unless that waiter only peeks with `WNOWAIT`.
pub struct WaitCondition {
    state: Mutex<WaitState>,
    queue: Arc<dyn WaitQueue>,
}

impl WaitCondition {
    pub fn new(queue: Arc<dyn WaitQueue>) -> Self {
        Self {
            state: Mutex::new(WaitState {
                pending: Vec::new(),
                finalized: false,
            }),
            queue,
        }
    }

    /// Records a state change of `child` and wakes every waiter.
    ///
    /// A terminated record is never replaced. Returns `false` once the
    /// condition has been finalized.
    pub fn unblock(&self, child: Arc<Process>, change: ChildStateChange) -> bool {
        {
            let mut state = self.state.lock();
            if state.finalized {
                return false;
            }
            let pid = child.get_pid();
            match state
                .pending
                .iter_mut()
                .find(|(pending, _)| pending.get_pid() == pid)
            {
                Some((_, recorded)) if recorded.is_terminated() => {}
                Some((_, recorded)) => *recorded = change,
                None => state.pending.push((child, change)),
            }
        }
        self.queue.notify_all();
        true
    }

    /// Takes the first record whose child matches `selector` and whose change
    /// is wanted by `options`. With `WNOWAIT` the record stays in place.
    pub fn try_take<F>(&self, selector: F, options: WaitOptions) -> Option<(Arc<Process>, ChildStateChange)>
    where
        F: Fn(&Process) -> bool,
    {
        let mut state = self.state.lock();
        let index = state
            .pending
            .iter()
            .position(|(child, change)| selector(child) && change.wanted_by(options))?;
        if options.contains(WaitOptions::WNOWAIT) {
            Some(state.pending[index].clone())
        } else {
            Some(state.pending.remove(index))
        }
    }

    pub fn has_pending<F>(&self, selector: F, options: WaitOptions) -> bool
    where
        F: Fn(&Process) -> bool,
    {
        self.state
            .lock()
            .pending
            .iter()
            .any(|(child, change)| selector(child) && change.wanted_by(options))
    }

    /// Drops any record held for `pid`.
    pub fn forget(&self, pid: Pid) {
        self.state
            .lock()
            .pending
            .retain(|(child, _)| child.get_pid() != pid);
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    pub fn wait_until(&self, condition: &mut dyn FnMut() -> bool) {
        self.queue.wait_until(condition);
    }

    pub fn notify_all(&self) {
        self.queue.notify_all();
    }

    /// Drops every record and rejects later ones. Waiters are woken so they
    /// can observe that nothing more will arrive.
    pub fn finalize(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.finalized = true;
            core::mem::take(&mut state.pending)
        };
        drop(dropped);
        self.queue.notify_all();
    }
}

/// The siginfo-like record a waiter receives for a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitInfo {
    pub signo: Signo,
    pub pid: Pid,
    pub uid: Uid,
    /// Exit status for `CLD_EXITED`, a signal number otherwise.
    pub status: i32,
    pub code: u32,
}

impl WaitInfo {
    pub fn new(child: &Process, change: ChildStateChange) -> Self {
        let (status, code) = match change {
            ChildStateChange::Terminated { signal: Some(signal) } => (signal as i32, CLD_KILLED),
            ChildStateChange::Terminated { signal: None } => {
                (child.termination_status() as i32, CLD_EXITED)
            }
            ChildStateChange::Stopped(signal) => (signal as i32, CLD_STOPPED),
            ChildStateChange::Continued => (Signo::SIGCONT as i32, CLD_CONTINUED),
        };
        Self {
            signo: Signo::SIGCHLD,
            pid: child.get_pid(),
            uid: child.uid(),
            status,
            code,
        }
    }

    /// The status word `wait4` stores for this record.
    pub fn status_word(&self) -> i32 {
        match self.code {
            CLD_EXITED => (self.status & 0xff) << 8,
            CLD_KILLED => self.status & 0x7f,
            CLD_STOPPED => (self.status << 8) | 0x7f,
            _ => 0xffff,
        }
    }
}
