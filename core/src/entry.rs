use crate::config::{AFFINITY_ANY, IDLE_PID};
use crate::kernel::Kernel;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use axerrno::{LinuxError, LinuxResult};
use kestrel_process::handle::TtyRef;
use kestrel_process::{
    Credentials, FdFlags, Gid, Pid, Process, ProcessBuilder, Thread, ThreadContext, Uid,
};
use memory_addr::VirtAddr;

/// Entry point of a kernel thread; it receives the thread's entry data.
pub type KernelEntry = extern "C" fn(usize);

/// The last component of `path`.
fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
}

fn entry_context(entry: KernelEntry, entry_data: usize) -> ThreadContext {
    ThreadContext {
        ip: VirtAddr::from_usize(entry as usize),
        sp: VirtAddr::from_usize(0),
        arg: entry_data,
    }
}

impl Kernel {
    /// Creates a process running the executable at `path`.
    ///
    /// The process starts in the parent's working directory (or `/` if the
    /// parent is gone) with descriptors 0, 1 and 2 on the terminal, or on the
    /// null device without one. Nothing is registered if loading fails.
    #[allow(clippy::too_many_arguments)]
    pub fn create_user_process(
        &self,
        path: &str,
        uid: Uid,
        gid: Gid,
        parent_pid: Pid,
        arguments: Vec<String>,
        environment: Vec<String>,
        tty: Option<TtyRef>,
    ) -> LinuxResult<(Arc<Process>, Arc<Thread>)> {
        let collaborators = self.collaborators();
        let name = basename(path).to_string();
        let arguments = if arguments.is_empty() {
            vec![name.clone()]
        } else {
            arguments
        };
        let root = collaborators.vfs.root_custody();
        let cwd = self
            .processes()
            .get(parent_pid)
            .and_then(|parent| parent.cwd())
            .unwrap_or_else(|| root.clone());

        let pid = self.processes().allocate_pid()?;
        let address_space = collaborators.memory.create_address_space()?;
        let scheduler = &collaborators.scheduler;
        let process = ProcessBuilder::new(pid, name)
            .parent(parent_pid)
            .credentials(Credentials::new(uid, gid))
            .fd_capacity(self.config().max_open_file_descriptors)
            .cwd(Some(cwd))
            .root_directory(Some(root))
            .tty(tty.clone())
            .address_space(Some(address_space))
            .wait_queues(scheduler.new_wait_queue(), scheduler.new_wait_queue())
            .build();
        let thread = process.create_main_thread();
        thread.detach();

        let stdio = match &tty {
            Some(tty) => tty.open()?,
            None => collaborators.vfs.open_null_device()?,
        };
        {
            let mut fds = process.fds();
            for fd in 0..3 {
                fds.set(fd, stdio.clone(), FdFlags::empty())?;
            }
        }

        if let Err(error) =
            collaborators
                .loader
                .exec(&process, &thread, path, &arguments, &environment)
        {
            error!("[process] failed to load {}: {:?}", path, error);
            return Err(error);
        }
        process.set_arguments_and_environment(arguments, environment);

        self.register(&process);
        scheduler.set_runnable(&thread, AFFINITY_ANY);
        info!("[process] created user process {}", process);
        Ok((process, thread))
    }

    /// Creates a registered kernel process with one runnable thread.
    pub fn create_kernel_process(
        &self,
        name: &str,
        entry: KernelEntry,
        entry_data: usize,
        affinity: u32,
    ) -> LinuxResult<(Arc<Process>, Arc<Thread>)> {
        let pid = self.processes().allocate_pid()?;
        Ok(self.spawn_kernel_process(pid, name, entry, entry_data, affinity))
    }

    /// Creates the idle process. It uses pid 0 and stays out of the table.
    pub fn create_idle_process(
        &self,
        entry: KernelEntry,
        affinity: u32,
    ) -> (Arc<Process>, Arc<Thread>) {
        self.spawn_kernel_process(IDLE_PID, "idle", entry, 0, affinity)
    }

    fn spawn_kernel_process(
        &self,
        pid: Pid,
        name: &str,
        entry: KernelEntry,
        entry_data: usize,
        affinity: u32,
    ) -> (Arc<Process>, Arc<Thread>) {
        let scheduler = &self.collaborators().scheduler;
        let process = ProcessBuilder::new(pid, name)
            .kernel()
            .credentials(Credentials::root())
            .wait_queues(scheduler.new_wait_queue(), scheduler.new_wait_queue())
            .build();
        let thread = process.create_main_thread();
        thread.set_affinity(affinity);
        thread.set_context(entry_context(entry, entry_data));
        if pid != IDLE_PID {
            self.register(&process);
        }
        scheduler.set_runnable(&thread, affinity);
        info!("[process] created kernel process {}", process);
        (process, thread)
    }

    /// Adds a kernel-entry thread to `process`.
    ///
    /// Fails with `EINVAL` if `priority` is outside the configured range, and
    /// with `ESRCH` if `process` is dying or its last thread has exited.
    #[allow(clippy::too_many_arguments)]
    pub fn create_kernel_thread(
        &self,
        process: &Arc<Process>,
        entry: KernelEntry,
        entry_data: usize,
        priority: u32,
        name: &str,
        affinity: u32,
        joinable: bool,
    ) -> LinuxResult<Arc<Thread>> {
        if !self.config().priority_is_valid(priority) {
            return Err(LinuxError::EINVAL);
        }
        let tid = self.processes().allocate_pid()?;
        let thread = process.try_create_thread(tid, name.into())?;
        thread.set_priority(priority);
        thread.set_affinity(affinity);
        thread.set_context(entry_context(entry, entry_data));
        if !joinable {
            thread.detach();
        }
        self.collaborators().scheduler.set_runnable(&thread, affinity);
        debug!("[process] created thread {} in {}", tid, process);
        Ok(thread)
    }
}
