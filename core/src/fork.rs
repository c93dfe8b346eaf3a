use crate::kernel::Kernel;
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use kestrel_process::{Process, ProcessBuilder, Thread};

impl Kernel {
    /// Duplicates `source` into a new child process.
    ///
    /// Only `calling_thread` is copied; the child's single thread resumes
    /// with the caller's registers. Descriptors keep their flags and share
    /// their descriptions with the parent.
    pub fn fork(&self, source: &Arc<Process>, calling_thread: &Arc<Thread>) -> LinuxResult<Arc<Process>> {
        if source.is_kernel_process() {
            return Err(LinuxError::EINVAL);
        }
        let pid = self.processes().allocate_pid()?;
        let address_space = match source.address_space() {
            Some(address_space) => Some(address_space.try_clone()?),
            None => None,
        };
        let scheduler = &self.collaborators().scheduler;
        let child = ProcessBuilder::new(pid, source.name())
            .parent(source.get_pid())
            .credentials(source.credentials())
            .executable(source.executable())
            .cwd(source.cwd())
            .root_directory(source.root_directory())
            .tty(source.tty())
            .address_space(address_space)
            .wait_queues(scheduler.new_wait_queue(), scheduler.new_wait_queue())
            .build();
        if let Some(root) = source.root_directory_relative_to_global_root() {
            child.set_root_directory_relative_to_global_root(root);
        }
        child.set_dumpable(source.is_dumpable());
        child.set_arguments_and_environment(source.arguments(), source.environment());
        let fds = source.fds().clone();
        *child.fds() = fds;

        let thread = calling_thread.fork_into(&child);
        self.register(&child);
        scheduler.set_runnable(&thread, thread.affinity());
        debug!("[process] {} forked {}", source, child);
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCustody, Harness};
    use kestrel_process::{FdFlags, ThreadContext};
    use memory_addr::VirtAddr;

    #[test]
    fn child_copies_calling_thread_and_descriptors() {
        let harness = Harness::new();
        let (parent, main) = harness.spawn("/bin/server", 0);
        let worker = parent.create_thread(harness.kernel.processes().allocate_pid().unwrap(), "worker".into());
        let context = ThreadContext {
            ip: VirtAddr::from_usize(0x40_2000),
            sp: VirtAddr::from_usize(0x7ff0_0000),
            arg: 0,
        };
        worker.set_context(context);
        parent.set_cwd(Arc::new(FakeCustody("/srv".into())));
        parent.fds().set_fd_flags(1, FdFlags::CLOEXEC).unwrap();

        let child = harness.kernel.fork(&parent, &worker).unwrap();
        assert_eq!(child.get_ppid(), parent.get_pid());
        assert_eq!(child.thread_count(), 1);
        let thread = child.get_main_thread().unwrap();
        assert_eq!(thread.context(), context);
        assert_eq!(thread.name(), "worker");
        assert_ne!(thread.get_tid(), main.get_tid());
        assert_eq!(child.cwd().unwrap().absolute_path(), "/srv");
        assert_eq!(child.arguments(), parent.arguments());
        assert_eq!(child.uid(), parent.uid());
        assert_eq!(child.fds().fd_flags(1), Ok(FdFlags::CLOEXEC));
        assert_eq!(child.fds().alloc_fd(0), Ok(3));
        assert!(parent.has_child(child.get_pid()));
        assert!(harness.kernel.processes().contains(child.get_pid()));
        assert_eq!(harness.memory.created(), 1);
    }

    #[test]
    fn kernel_processes_cannot_fork() {
        extern "C" fn entry(_: usize) {}
        let harness = Harness::new();
        let (process, thread) = harness.kernel.create_kernel_process("kworker", entry, 0, 1).unwrap();
        assert_eq!(harness.kernel.fork(&process, &thread).err(), Some(LinuxError::EINVAL));
    }
}
