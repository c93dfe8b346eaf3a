use crate::kernel::Kernel;
use alloc::string::String;
use alloc::format;
use alloc::sync::Arc;
use kernel_guard::IrqSave;
use kestrel_process::{ChildStateChange, Process, Signo, Thread, ThreadState};
use memory_addr::VirtAddr;

/// What a signal does when the process has not installed a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSignalAction {
    Terminate,
    DumpCore,
    Ignore,
    Stop,
    Continue,
}

impl DefaultSignalAction {
    pub fn of(signo: Signo) -> Self {
        use Signo::*;
        match signo {
            SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGXCPU
            | SIGXFSZ | SIGSYS => Self::DumpCore,
            SIGCHLD | SIGURG | SIGWINCH => Self::Ignore,
            SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => Self::Stop,
            SIGCONT => Self::Continue,
            _ => Self::Terminate,
        }
    }
}

impl Kernel {
    /// Ends `process` because of `signal`. Runs on one of its own threads.
    pub fn terminate_due_to_signal(&self, process: &Process, signal: Signo) {
        assert!(
            self.current_process()
                .is_ok_and(|current| current.get_pid() == process.get_pid()),
            "[exit] {} terminated from outside its own threads",
            process
        );
        let _guard = IrqSave::new();
        info!("[exit] {} terminated by {:?}", process, signal);
        process.set_termination_status(0);
        process.set_termination_signal(Some(signal));
        self.die(process);
    }

    /// Takes the lowest pending signal of `thread` and applies its default
    /// action. Returns the signal, if one was pending.
    pub fn dispatch_signal(&self, thread: &Arc<Thread>) -> Option<Signo> {
        let signo = thread.dequeue_signal()?;
        let Some(process) = thread.get_process() else {
            return Some(signo);
        };
        match DefaultSignalAction::of(signo) {
            DefaultSignalAction::Ignore => {}
            DefaultSignalAction::Stop => {
                thread.set_state(ThreadState::Stopped);
                self.unblock_waiters(&process, ChildStateChange::Stopped(signo));
            }
            DefaultSignalAction::Continue => {
                if thread.state() == ThreadState::Stopped {
                    thread.set_state(ThreadState::Runnable);
                    self.collaborators()
                        .scheduler
                        .set_runnable(thread, thread.affinity());
                }
                self.unblock_waiters(&process, ChildStateChange::Continued);
            }
            DefaultSignalAction::DumpCore => {
                process.set_dump_core(true);
                self.terminate_due_to_signal(&process, signo);
            }
            DefaultSignalAction::Terminate => self.terminate_due_to_signal(&process, signo),
        }
        Some(signo)
    }

    fn describe_fault(&self, address: VirtAddr) -> String {
        let symbol = self
            .collaborators()
            .symbols
            .as_ref()
            .and_then(|symbols| symbols.symbolicate(address));
        match symbol {
            Some(symbol) => format!(
                "{:#x} ({}+{:#x})",
                address.as_usize(),
                symbol.name,
                address.as_usize() - symbol.address.as_usize()
            ),
            None => format!("{:#x}", address.as_usize()),
        }
    }

    /// Kills the current process after a fatal fault and ends the current
    /// thread. Never returns.
    pub fn crash(&self, signal: Signo, fault_address: Option<VirtAddr>, out_of_memory: bool) -> ! {
        let _guard = IrqSave::new();
        let thread = match self.current_thread() {
            Ok(thread) => thread,
            Err(_) => panic!("[crash] no current thread"),
        };
        let Some(process) = thread.get_process() else {
            panic!("[crash] thread {} has no process", thread.get_tid());
        };
        assert!(!process.is_dead(), "[crash] {} is already dead", process);
        assert!(
            process.is_user_process(),
            "[crash] kernel process {} crashed",
            process
        );

        if out_of_memory {
            error!("[crash] {}: Out of memory", process);
        } else {
            match fault_address {
                Some(address) => error!(
                    "[crash] {} thread {} crashed with {:?} at {}",
                    process,
                    thread.get_tid(),
                    signal,
                    self.describe_fault(address)
                ),
                None => error!(
                    "[crash] {} thread {} crashed with {:?}",
                    process,
                    thread.get_tid(),
                    signal
                ),
            }
            process.set_dump_core(true);
        }
        process.set_termination_status(0);
        process.set_termination_signal(Some(signal));
        if let Some(address_space) = process.address_space() {
            address_space.dump_regions();
        }
        self.die(&process);
        drop(process);
        drop(thread);
        self.collaborators().scheduler.exit_current()
    }

    /// Ends the calling thread. Never returns.
    pub fn exit_current_thread(&self) -> ! {
        self.collaborators().scheduler.exit_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Symbol;
    use crate::testing::{catch_thread_exit, FakeTty, Harness};
    use kestrel_process::WaitOptions;

    #[test]
    fn crash_dumps_regions_and_never_returns() {
        let harness = Harness::with_symbols(vec![Symbol {
            name: "main".into(),
            address: VirtAddr::from_usize(0x40_1000),
        }]);
        let (process, thread) = harness.spawn("/bin/crasher", 0);
        let helper = process.create_thread(harness.kernel.processes().allocate_pid().unwrap(), "helper".into());
        harness.run_as(&thread);

        let outcome = catch_thread_exit::<()>(|| {
            harness
                .kernel
                .crash(Signo::SIGSEGV, Some(VirtAddr::from_usize(0x40_1010)), false)
        });
        assert!(outcome.is_err());
        assert!(process.should_core_dump());
        assert_eq!(process.termination_signal(), Some(Signo::SIGSEGV));
        assert!(thread.should_die() && helper.should_die());
        assert_eq!(process.threads_for_coredump().len(), 2);
        let events = harness.events.snapshot();
        assert!(events.contains(&"dump_regions".to_string()));
        assert_eq!(events.last(), Some(&format!("exit {}", thread.get_tid())));
    }

    #[test]
    fn out_of_memory_crash_skips_core_dump() {
        let harness = Harness::new();
        let (process, thread) = harness.spawn("/bin/hog", 0);
        harness.run_as(&thread);
        let outcome = catch_thread_exit::<()>(|| harness.kernel.crash(Signo::SIGKILL, None, true));
        assert!(outcome.is_err());
        assert!(!process.should_core_dump());
        assert_eq!(process.termination_signal(), Some(Signo::SIGKILL));
    }

    #[test]
    fn crashed_process_is_finalized_with_core_dump() {
        let harness = Harness::new();
        let (process, thread) = harness.spawn("/bin/crasher", 0);
        harness.run_as(&thread);
        let _ = catch_thread_exit::<()>(|| harness.kernel.crash(Signo::SIGBUS, None, false));
        harness.kernel.thread_exited(&thread);
        assert_eq!(harness.kernel.finalize_pending(), 1);
        assert_eq!(harness.core_dumps.dumps().len(), 1);
        assert_eq!(harness.core_dumps.dumps()[0].threads, 1);
    }

    #[test]
    #[should_panic(expected = "already dead")]
    fn crashing_a_dead_process_panics() {
        let harness = Harness::new();
        let (process, thread) = harness.spawn("/bin/zombie", 0);
        process.set_dead();
        harness.run_as(&thread);
        harness.kernel.crash(Signo::SIGSEGV, None, false);
    }

    #[test]
    fn termination_by_signal_kills_every_thread() {
        let harness = Harness::new();
        let tty = FakeTty::new("tty0");
        let (process, thread) = harness
            .kernel
            .create_user_process("/bin/sh", 0, 0, 0, vec![], vec![], Some(tty))
            .unwrap();
        let helper = process.create_thread(harness.kernel.processes().allocate_pid().unwrap(), "helper".into());
        process.set_termination_status(9);
        harness.run_as(&helper);
        harness.kernel.terminate_due_to_signal(&process, Signo::SIGTERM);
        assert_eq!(process.termination_status(), 0);
        assert_eq!(process.termination_signal(), Some(Signo::SIGTERM));
        assert!(process.tty().is_none());
        assert!(thread.should_die() && helper.should_die());
        let woken = harness.scheduler.woken();
        assert!(woken.contains(&thread.get_tid()) && woken.contains(&helper.get_tid()));
    }

    #[test]
    fn stop_and_continue_are_reported_to_parent() {
        let harness = Harness::new();
        let (parent, _) = harness.spawn("/bin/sh", 0);
        let (child, thread) = harness.spawn("/bin/job", parent.get_pid());

        thread.send_signal(Signo::SIGTSTP, parent.get_pid());
        assert_eq!(harness.kernel.dispatch_signal(&thread), Some(Signo::SIGTSTP));
        assert_eq!(thread.state(), ThreadState::Stopped);
        assert!(parent.wait_condition().has_pending(|c| c.get_pid() == child.get_pid(), WaitOptions::WUNTRACED));

        thread.send_signal(Signo::SIGCONT, parent.get_pid());
        assert_eq!(harness.kernel.dispatch_signal(&thread), Some(Signo::SIGCONT));
        assert_eq!(thread.state(), ThreadState::Runnable);
        let (_, change) = parent
            .wait_condition()
            .try_take(|_| true, WaitOptions::WCONTINUED)
            .unwrap();
        assert_eq!(change, ChildStateChange::Continued);
        assert_eq!(harness.kernel.dispatch_signal(&thread), None);
    }

    #[test]
    fn fatal_signal_dispatch_terminates() {
        let harness = Harness::new();
        let (process, thread) = harness.spawn("/bin/victim", 0);
        harness.run_as(&thread);
        thread.send_signal(Signo::SIGCHLD, 1);
        thread.send_signal(Signo::SIGQUIT, 1);
        assert_eq!(harness.kernel.dispatch_signal(&thread), Some(Signo::SIGQUIT));
        assert!(process.should_core_dump());
        assert!(thread.should_die());
        assert_eq!(harness.kernel.dispatch_signal(&thread), Some(Signo::SIGCHLD));
    }

    #[test]
    #[should_panic(expected = "outside its own threads")]
    fn termination_from_another_process_panics() {
        let harness = Harness::new();
        let (_, killer) = harness.spawn("/bin/kill", 0);
        let (victim, _) = harness.spawn("/bin/victim", 0);
        harness.run_as(&killer);
        harness.kernel.terminate_due_to_signal(&victim, Signo::SIGTERM);
    }

    #[test]
    fn fault_signals_dump_core() {
        assert_eq!(DefaultSignalAction::of(Signo::SIGSEGV), DefaultSignalAction::DumpCore);
        assert_eq!(DefaultSignalAction::of(Signo::SIGKILL), DefaultSignalAction::Terminate);
        assert_eq!(DefaultSignalAction::of(Signo::SIGCHLD), DefaultSignalAction::Ignore);
        assert_eq!(DefaultSignalAction::of(Signo::SIGTSTP), DefaultSignalAction::Stop);
        assert_eq!(DefaultSignalAction::of(Signo::SIGCONT), DefaultSignalAction::Continue);
    }
}
