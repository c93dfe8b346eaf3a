//! Deferred teardown of processes whose last thread has exited.
//!
//! Teardown can block (it writes core dumps), so it never runs on the exiting
//! thread. The process is queued instead and a dedicated kernel thread drains
//! the queue one process at a time.

use crate::kernel::Kernel;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use kestrel_process::{ChildStateChange, Process, Signo, WaitQueue};
use spin::Mutex;

pub(crate) struct Finalizer {
    queue: Mutex<VecDeque<Arc<Process>>>,
    draining: AtomicBool,
    wait_queue: Arc<dyn WaitQueue>,
}

impl Finalizer {
    pub(crate) fn new(wait_queue: Arc<dyn WaitQueue>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            wait_queue,
        }
    }

    pub(crate) fn enqueue(&self, process: Arc<Process>) {
        self.queue.lock().push_back(process);
        self.wait_queue.notify_all();
    }

    fn pop(&self) -> Option<Arc<Process>> {
        self.queue.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Kernel {
    /// Number of processes waiting for the finalizer.
    pub fn pending_finalization(&self) -> usize {
        self.finalizer.queue.lock().len()
    }

    /// Finalizes every queued process. Returns how many were finalized.
    ///
    /// Only one caller drains at a time; a concurrent call returns 0 at once.
    pub fn finalize_pending(&self) -> usize {
        if self.finalizer.draining.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut finalized = 0;
        while let Some(process) = self.finalizer.pop() {
            self.finalize(&process);
            finalized += 1;
        }
        self.finalizer.draining.store(false, Ordering::Release);
        finalized
    }

    /// Body of the finalizer kernel thread.
    pub fn finalizer_loop(&self) -> ! {
        info!("[finalizer] started");
        loop {
            self.finalizer
                .wait_queue
                .wait_until(&mut || !self.finalizer.is_empty());
            self.finalize_pending();
        }
    }

    /// Tears down a process none of whose threads is left.
    fn finalize(&self, process: &Arc<Process>) {
        assert_eq!(
            process.thread_count(),
            0,
            "[finalizer] {} still has threads",
            process
        );
        assert!(
            process.mark_finalized(),
            "[finalizer] {} finalized twice",
            process
        );
        debug!("[finalizer] finalizing {}", process);

        if process.is_dumpable() {
            if process.should_core_dump() {
                if let Err(error) = self.dump_core(process) {
                    warn!("[finalizer] core dump of {} failed: {:?}", process, error);
                }
            }
            if process.has_perf_events() {
                if let Err(error) = self.dump_perfcore(process) {
                    warn!("[finalizer] perfcore of {} failed: {:?}", process, error);
                }
            }
        }

        process.release_resources();

        if let Some(timer) = process.take_alarm() {
            self.collaborators().timers.cancel(timer);
        }

        process.set_dead();

        let pid = process.get_pid();
        match self.processes().get(process.get_ppid()) {
            Some(parent) if parent.get_pid() != pid => {
                if !parent.ignores_child_notifications() {
                    if let Some(main) = parent.get_main_thread() {
                        main.send_signal(Signo::SIGCHLD, pid);
                        self.collaborators().scheduler.wake(&main);
                    }
                }
                parent.add_dead_child_ticks(process.ticks_in_user(), process.ticks_in_kernel());
                parent.wait_condition().unblock(
                    process.clone(),
                    ChildStateChange::Terminated {
                        signal: process.termination_signal(),
                    },
                );
            }
            _ => trace!("[finalizer] {} has no parent to notify", process),
        }

        if let Some(address_space) = process.address_space() {
            address_space.remove_all_regions();
        }

        self.processes().unregister(pid);
        info!("[finalizer] {} finalized", process);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, HARNESS_TIME};
    use kestrel_process::handle::TimerId;
    use kestrel_process::WaitOptions;

    #[test]
    fn process_is_queued_when_last_thread_exits() {
        let harness = Harness::new();
        let (process, thread) = harness.spawn("/bin/true", 0);
        let pid = process.get_pid();
        assert_eq!(harness.kernel.pending_finalization(), 0);
        harness.kernel.thread_exited(&thread);
        assert_eq!(harness.kernel.pending_finalization(), 1);
        assert!(harness.kernel.processes().contains(pid));
        assert_eq!(harness.kernel.finalize_pending(), 1);
        assert!(!harness.kernel.processes().contains(pid));
        assert!(process.is_dead());
    }

    #[test]
    fn parent_receives_sigchld_ticks_and_event() {
        let harness = Harness::new();
        let (parent, parent_thread) = harness.spawn("/bin/sh", 0);
        let (child, _) = harness.spawn("/bin/true", parent.get_pid());
        child.add_ticks(7, 3);
        parent.add_ticks(100, 100);
        child.set_termination_status(4);

        harness.reap_threads_and_finalize(&child);

        assert_eq!(parent_thread.dequeue_signal(), Some(Signo::SIGCHLD));
        assert_eq!(parent.ticks_in_user_for_dead_children(), 7);
        assert_eq!(parent.ticks_in_kernel_for_dead_children(), 3);
        let (taken, change) = parent
            .wait_condition()
            .try_take(|c| c.get_pid() == child.get_pid(), WaitOptions::WEXITED)
            .unwrap();
        assert_eq!(change, ChildStateChange::Terminated { signal: None });
        assert_eq!(taken.wait_info().status_word(), 4 << 8);
    }

    #[test]
    fn parent_ignoring_children_gets_no_sigchld() {
        let harness = Harness::new();
        let (parent, parent_thread) = harness.spawn("/bin/sh", 0);
        parent.set_ignore_child_notifications(true);
        let (child, _) = harness.spawn("/bin/true", parent.get_pid());
        harness.reap_threads_and_finalize(&child);
        assert_eq!(parent_thread.dequeue_signal(), None);
        assert_eq!(parent.wait_condition().pending_count(), 1);
    }

    #[test]
    fn core_dump_precedes_death_and_sigchld() {
        let harness = Harness::new();
        let (parent, parent_thread) = harness.spawn("/bin/sh", 0);
        let (child, _) = harness.spawn("/bin/crasher", parent.get_pid());
        child.set_dump_core(true);
        harness.reap_threads_and_finalize(&child);

        let expected = format!("/tmp/coredump/crasher_{}_{}", child.get_pid(), HARNESS_TIME);
        let dumps = harness.core_dumps.dumps();
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0].path, expected);
        assert!(!dumps[0].process_was_dead);

        let dumped = harness.events.position("core_dump").unwrap();
        let signalled = harness
            .events
            .position(&format!("wake {}", parent_thread.get_tid()))
            .unwrap();
        let unmapped = harness.events.position("remove_regions").unwrap();
        assert!(dumped < signalled && signalled < unmapped);
    }

    #[test]
    fn undumpable_process_is_not_dumped() {
        let harness = Harness::new();
        let (process, _) = harness.spawn("/bin/secret", 0);
        process.set_dump_core(true);
        process.set_dumpable(false);
        harness.reap_threads_and_finalize(&process);
        assert!(harness.core_dumps.dumps().is_empty());
    }

    #[test]
    fn failed_core_dump_does_not_stop_finalization() {
        let harness = Harness::new();
        harness.core_dumps.fail_always();
        let (process, _) = harness.spawn("/bin/crasher", 0);
        process.set_dump_core(true);
        assert_eq!(harness.reap_threads_and_finalize(&process), 1);
        assert!(process.is_dead());
    }

    #[test]
    fn perf_events_land_in_cwd() {
        let harness = Harness::new();
        let (process, _) = harness.spawn("/bin/profiled", 0);
        harness.kernel.ensure_perf_events(&process);
        harness.reap_threads_and_finalize(&process);
        let file = harness
            .vfs
            .file(&format!("/perfcore.{}", process.get_pid()))
            .unwrap();
        assert_eq!(file.mode, crate::config::PERFCORE_MODE);
        let json = String::from_utf8(file.contents()).unwrap();
        assert!(json.contains("/bin/profiled"));
    }

    #[test]
    fn pending_alarm_is_cancelled() {
        let harness = Harness::new();
        let (process, _) = harness.spawn("/bin/sleep", 0);
        harness.kernel.set_alarm(&process, Some(TimerId(9)));
        harness.reap_threads_and_finalize(&process);
        assert_eq!(harness.timers.cancelled(), vec![TimerId(9)]);
    }

    #[test]
    fn finalized_process_releases_its_handles() {
        let harness = Harness::new();
        let (parent, _) = harness.spawn("/bin/sh", 0);
        let (child, _) = harness.spawn("/bin/true", parent.get_pid());
        harness.reap_threads_and_finalize(&child);
        harness.reap_threads_and_finalize(&parent);
        assert!(parent.cwd().is_none());
        assert!(parent.get_children().is_empty());
        assert!(parent.wait_condition().is_finalized());
        assert_eq!(parent.fds().capacity(), 0);
        assert!(harness.kernel.processes().is_empty());
    }

    #[test]
    #[should_panic(expected = "still has threads")]
    fn finalizing_with_live_threads_panics() {
        let harness = Harness::new();
        let (process, _) = harness.spawn("/bin/true", 0);
        harness.kernel.finalize(&process);
    }

    #[test]
    #[should_panic(expected = "finalized twice")]
    fn finalizing_twice_panics() {
        let harness = Harness::new();
        let (process, _) = harness.spawn("/bin/true", 0);
        harness.reap_threads_and_finalize(&process);
        harness.kernel.finalize(&process);
    }
}
