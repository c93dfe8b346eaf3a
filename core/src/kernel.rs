use crate::config::KernelConfig;
use crate::finalizer::Finalizer;
use crate::interface::Collaborators;
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use kestrel_process::handle::TimerId;
use kestrel_process::{
    ChildStateChange, Pid, Process, ProcessTable, Signo, Thread, ThreadState,
};

/// The lifecycle core: the process table, the finalizer queue and the
/// services both rely on.
pub struct Kernel {
    config: KernelConfig,
    processes: ProcessTable,
    pub(crate) finalizer: Finalizer,
    collaborators: Collaborators,
}

impl Kernel {
    pub fn new(config: KernelConfig, collaborators: Collaborators) -> Self {
        let finalizer = Finalizer::new(collaborators.scheduler.new_wait_queue());
        Self {
            config,
            processes: ProcessTable::new(),
            finalizer,
            collaborators,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn current_thread(&self) -> LinuxResult<Arc<Thread>> {
        self.collaborators
            .scheduler
            .current_thread()
            .ok_or(LinuxError::ESRCH)
    }

    pub fn current_process(&self) -> LinuxResult<Arc<Process>> {
        self.current_thread()?
            .get_process()
            .ok_or(LinuxError::ESRCH)
    }

    /// Adds a fully built process to the table and to its parent's children.
    pub(crate) fn register(&self, process: &Arc<Process>) {
        self.processes.register(process.clone());
        let ppid = process.get_ppid();
        if ppid != process.get_pid() {
            if let Some(parent) = self.processes.get(ppid) {
                parent.add_child(process.clone());
            }
        }
        debug!("[process] registered {}", process);
    }

    /// Called by the scheduler once `thread` has stopped running for good.
    ///
    /// When it was the last thread of its process, the process is queued for
    /// the finalizer. If that thread left through `exit` and nothing killed
    /// the process, its exit status becomes the process's.
    pub fn thread_exited(&self, thread: &Arc<Thread>) {
        thread.set_state(ThreadState::Dead);
        let Some(process) = thread.get_process() else {
            return;
        };
        if process.remove_thread(thread.get_tid()) {
            if let Some(status) = thread.exit_status().filter(|_| !process.is_dying()) {
                process.set_termination_status(status);
                process.set_termination_signal(None);
            }
            debug!(
                "[exit] last thread {} of {} exited",
                thread.get_tid(),
                process
            );
            self.finalizer.enqueue(process);
        }
    }

    /// Routes a process-directed signal and wakes the receiving thread.
    pub fn send_signal(&self, process: &Process, signo: Signo, sender: Pid) -> LinuxResult<()> {
        let receiver = process.send_signal(signo, sender)?;
        trace!(
            "[process] {:?} from {} delivered to thread {} of {}",
            signo,
            sender,
            receiver.get_tid(),
            process
        );
        self.collaborators.scheduler.wake(&receiver);
        Ok(())
    }

    /// Raises `signo` on one thread and wakes it.
    pub fn send_signal_to_thread(&self, thread: &Arc<Thread>, signo: Signo, sender: Pid) -> LinuxResult<()> {
        if thread.is_dead() {
            return Err(LinuxError::ESRCH);
        }
        thread.send_signal(signo, sender);
        self.collaborators.scheduler.wake(thread);
        Ok(())
    }

    /// Reports a state change of `child` to its parent's waiters.
    pub fn unblock_waiters(&self, child: &Arc<Process>, change: ChildStateChange) -> bool {
        match self.processes.get(child.get_ppid()) {
            Some(parent) if parent.get_pid() != child.get_pid() => {
                parent.wait_condition().unblock(child.clone(), change)
            }
            _ => false,
        }
    }

    /// Starts tearing `process` down and wakes the threads asked to die.
    pub fn die(&self, process: &Process) {
        for thread in process.die() {
            self.collaborators.scheduler.wake(&thread);
        }
    }

    /// Gives `process` a perf event buffer if it has none yet.
    pub fn ensure_perf_events(&self, process: &Process) {
        process.ensure_perf_events(|| self.collaborators.perf_events.create_buffer());
    }

    /// Arms an alarm for `process`, cancelling the one it replaces.
    pub fn set_alarm(&self, process: &Process, timer: Option<TimerId>) {
        if let Some(previous) = process.set_alarm(timer) {
            self.collaborators.timers.cancel(previous);
        }
    }
}
