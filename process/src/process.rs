use crate::Pid;
use crate::big_lock::BigLock;
use crate::credentials::{Credentials, Gid, Uid};
use crate::fd_table::FdTable;
use crate::handle::{AddressSpaceRef, CustodyRef, PerfEventBuffer, TimerId, TtyRef};
use crate::signal::Signo;
use crate::thread::{Thread, ThreadContext, ThreadState};
use crate::wait::{SpinWaitQueue, WaitCondition, WaitInfo, WaitQueue};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::{LinuxError, LinuxResult};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use kernel_guard::IrqSave;
use spin::{Mutex, MutexGuard, RwLock};

/// A tracer attached to a process, and the registers of the last trap it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTracer {
    tracer_pid: Pid,
    regs: Option<ThreadContext>,
}

impl ThreadTracer {
    pub fn tracer_pid(&self) -> Pid {
        self.tracer_pid
    }

    pub fn regs(&self) -> Option<ThreadContext> {
        self.regs
    }
}

/// Filesystem and terminal references plus the program arguments.
#[derive(Default)]
struct Resources {
    executable: Option<CustodyRef>,
    cwd: Option<CustodyRef>,
    root_directory: Option<CustodyRef>,
    root_directory_relative_to_global_root: Option<CustodyRef>,
    tty: Option<TtyRef>,
    arguments: Vec<String>,
    environment: Vec<String>,
}

pub struct Process {
    pid: Pid,
    ppid: Pid,
    is_kernel_process: bool,
    name: Mutex<String>,
    credentials: RwLock<Credentials>,

    threads: Mutex<BTreeMap<Pid, Arc<Thread>>>,
    thread_count: AtomicUsize,
    threads_for_coredump: Mutex<Vec<Arc<Thread>>>,
    children: Mutex<BTreeMap<Pid, Arc<Process>>>,

    fds: Mutex<FdTable>,
    resources: Mutex<Resources>,
    address_space: Mutex<Option<AddressSpaceRef>>,
    perf_events: Mutex<Option<Box<dyn PerfEventBuffer>>>,
    tracer: Mutex<Option<ThreadTracer>>,
    alarm_timer: Mutex<Option<TimerId>>,

    termination_status: AtomicU8,
    /// Signal number that terminated the process, 0 if none.
    termination_signal: AtomicU8,
    should_dump_core: AtomicBool,
    dumpable: AtomicBool,
    dead: AtomicBool,
    dying: AtomicBool,
    finalized: AtomicBool,
    ignore_child_notifications: AtomicBool,

    ticks_in_user: AtomicU64,
    ticks_in_kernel: AtomicU64,
    ticks_in_user_for_dead_children: AtomicU64,
    ticks_in_kernel_for_dead_children: AtomicU64,

    big_lock: BigLock,
    wait_condition: WaitCondition,
}

/// Collects everything a [`Process`] is created with.
pub struct ProcessBuilder {
    pid: Pid,
    ppid: Pid,
    name: String,
    credentials: Credentials,
    is_kernel_process: bool,
    dumpable: bool,
    fd_capacity: usize,
    executable: Option<CustodyRef>,
    cwd: Option<CustodyRef>,
    root_directory: Option<CustodyRef>,
    tty: Option<TtyRef>,
    address_space: Option<AddressSpaceRef>,
    wait_queue: Arc<dyn WaitQueue>,
    big_lock_queue: Arc<dyn WaitQueue>,
}

impl ProcessBuilder {
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            ppid: 0,
            name: name.into(),
            credentials: Credentials::root(),
            is_kernel_process: false,
            dumpable: true,
            fd_capacity: 0,
            executable: None,
            cwd: None,
            root_directory: None,
            tty: None,
            address_space: None,
            wait_queue: Arc::new(SpinWaitQueue),
            big_lock_queue: Arc::new(SpinWaitQueue),
        }
    }

    pub fn parent(mut self, ppid: Pid) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Kernel processes are never dumpable.
    pub fn kernel(mut self) -> Self {
        self.is_kernel_process = true;
        self.dumpable = false;
        self
    }

    pub fn fd_capacity(mut self, capacity: usize) -> Self {
        self.fd_capacity = capacity;
        self
    }

    pub fn executable(mut self, executable: Option<CustodyRef>) -> Self {
        self.executable = executable;
        self
    }

    pub fn cwd(mut self, cwd: Option<CustodyRef>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn root_directory(mut self, root: Option<CustodyRef>) -> Self {
        self.root_directory = root;
        self
    }

    pub fn tty(mut self, tty: Option<TtyRef>) -> Self {
        self.tty = tty;
        self
    }

    pub fn address_space(mut self, address_space: Option<AddressSpaceRef>) -> Self {
        self.address_space = address_space;
        self
    }

    /// Queues used for child events and for the big lock.
    pub fn wait_queues(mut self, wait_queue: Arc<dyn WaitQueue>, big_lock_queue: Arc<dyn WaitQueue>) -> Self {
        self.wait_queue = wait_queue;
        self.big_lock_queue = big_lock_queue;
        self
    }

    pub fn build(self) -> Arc<Process> {
        Arc::new(Process {
            pid: self.pid,
            ppid: self.ppid,
            is_kernel_process: self.is_kernel_process,
            name: Mutex::new(self.name),
            credentials: RwLock::new(self.credentials),
            threads: Mutex::new(BTreeMap::new()),
            thread_count: AtomicUsize::new(0),
            threads_for_coredump: Mutex::new(Vec::new()),
            children: Mutex::new(BTreeMap::new()),
            fds: Mutex::new(FdTable::new(self.fd_capacity)),
            resources: Mutex::new(Resources {
                executable: self.executable,
                cwd: self.cwd,
                root_directory_relative_to_global_root: self.root_directory.clone(),
                root_directory: self.root_directory,
                tty: self.tty,
                ..Resources::default()
            }),
            address_space: Mutex::new(self.address_space),
            perf_events: Mutex::new(None),
            tracer: Mutex::new(None),
            alarm_timer: Mutex::new(None),
            termination_status: AtomicU8::new(0),
            termination_signal: AtomicU8::new(0),
            should_dump_core: AtomicBool::new(false),
            dumpable: AtomicBool::new(self.dumpable),
            dead: AtomicBool::new(false),
            dying: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            ignore_child_notifications: AtomicBool::new(false),
            ticks_in_user: AtomicU64::new(0),
            ticks_in_kernel: AtomicU64::new(0),
            ticks_in_user_for_dead_children: AtomicU64::new(0),
            ticks_in_kernel_for_dead_children: AtomicU64::new(0),
            big_lock: BigLock::new(self.big_lock_queue),
            wait_condition: WaitCondition::new(self.wait_queue),
        })
    }
}

impl Process {
    pub fn get_pid(&self) -> Pid {
        self.pid
    }

    pub fn get_ppid(&self) -> Pid {
        self.ppid
    }

    pub fn is_kernel_process(&self) -> bool {
        self.is_kernel_process
    }

    pub fn is_user_process(&self) -> bool {
        !self.is_kernel_process
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.read().clone()
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = credentials;
    }

    pub fn uid(&self) -> Uid {
        self.credentials.read().uid
    }

    pub fn gid(&self) -> Gid {
        self.credentials.read().gid
    }

    pub fn euid(&self) -> Uid {
        self.credentials.read().euid
    }

    pub fn is_superuser(&self) -> bool {
        self.credentials.read().is_superuser()
    }

    pub fn in_group(&self, gid: Gid) -> bool {
        self.credentials.read().in_group(gid)
    }

    // threads

    pub(crate) fn add_thread(&self, thread: Arc<Thread>) {
        let tid = thread.get_tid();
        if self.threads.lock().insert(tid, thread).is_some() {
            panic!("[process] thread with id {} already exists", tid);
        }
        self.thread_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Creates a thread with the given id and adds it to this process while
    /// it is being built. See [`Process::try_create_thread`] for running ones.
    pub fn create_thread(self: &Arc<Self>, tid: Pid, name: String) -> Arc<Thread> {
        let thread = Thread::new(tid, self, name);
        self.add_thread(thread.clone());
        thread
    }

    /// Adds a thread to a process that is still running.
    ///
    /// Fails with `ESRCH` once the last thread has left, or once the process
    /// is dying or finalized.
    pub fn try_create_thread(self: &Arc<Self>, tid: Pid, name: String) -> LinuxResult<Arc<Thread>> {
        let mut threads = self.threads.lock();
        if threads.is_empty() || self.is_dying() || self.is_finalized() {
            return Err(LinuxError::ESRCH);
        }
        let thread = Thread::new(tid, self, name);
        if threads.insert(tid, thread.clone()).is_some() {
            panic!("[process] thread with id {} already exists", tid);
        }
        self.thread_count.fetch_add(1, Ordering::AcqRel);
        Ok(thread)
    }

    /// Creates the first thread, whose tid is the pid.
    pub fn create_main_thread(self: &Arc<Self>) -> Arc<Thread> {
        self.create_thread(self.pid, self.name())
    }

    /// Forgets a thread that has finished running.
    /// Returns `true` if it was the last one.
    pub fn remove_thread(&self, tid: Pid) -> bool {
        let mut threads = self.threads.lock();
        if threads.remove(&tid).is_none() {
            return false;
        }
        self.thread_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    pub fn get_thread(&self, tid: Pid) -> Option<Arc<Thread>> {
        self.threads.lock().get(&tid).cloned()
    }

    pub fn get_main_thread(&self) -> Option<Arc<Thread>> {
        self.get_thread(self.pid)
    }

    pub fn get_threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Threads kept alive so that a core dump can still describe them.
    pub fn threads_for_coredump(&self) -> Vec<Arc<Thread>> {
        self.threads_for_coredump.lock().clone()
    }

    // signals and termination

    /// The thread a process-directed signal is delivered to: the main thread
    /// while it is alive, otherwise any surviving thread.
    pub fn signal_receiver(&self) -> LinuxResult<Arc<Thread>> {
        let _guard = IrqSave::new();
        let threads = self.threads.lock();
        if let Some(main) = threads.get(&self.pid).filter(|main| !main.is_dead()) {
            return Ok(main.clone());
        }
        threads
            .values()
            .find(|thread| !thread.is_dead())
            .cloned()
            .ok_or(LinuxError::ESRCH)
    }

    /// Makes `signo` pending on the receiving thread and returns that thread.
    pub fn send_signal(&self, signo: Signo, sender: Pid) -> LinuxResult<Arc<Thread>> {
        let _guard = IrqSave::new();
        let receiver = self.signal_receiver()?;
        receiver.send_signal(signo, sender);
        Ok(receiver)
    }

    /// Starts tearing the process down: drops the controlling terminal,
    /// retains every live thread for a core dump and asks all of them to die.
    ///
    /// Returns the threads that were newly asked to die, for the caller to wake.
    pub fn die(&self) -> Vec<Arc<Thread>> {
        self.resources.lock().tty = None;
        {
            let _guard = IrqSave::new();
            let threads = self.threads.lock();
            self.dying.store(true, Ordering::Release);
            let mut retained = self.threads_for_coredump.lock();
            for thread in threads.values().filter(|thread| !thread.is_dead()) {
                if !retained.iter().any(|kept| Arc::ptr_eq(kept, thread)) {
                    retained.push(thread.clone());
                }
            }
        }
        self.kill_all_threads()
    }

    /// Detaches every thread and asks it to die.
    pub fn kill_all_threads(&self) -> Vec<Arc<Thread>> {
        let _guard = IrqSave::new();
        let threads = self.threads.lock();
        threads
            .values()
            .filter(|thread| {
                thread.detach();
                thread.set_should_die()
            })
            .cloned()
            .collect()
    }

    /// Like [`Process::kill_all_threads`] but spares `current` and threads
    /// that are already on their way out. Waiters on the big lock are released.
    pub fn kill_threads_except_self(&self, current: &Thread) -> Vec<Arc<Thread>> {
        if self.thread_count() <= 1 {
            return Vec::new();
        }
        let killed: Vec<_> = {
            let _guard = IrqSave::new();
            let threads = self.threads.lock();
            threads
                .values()
                .filter(|thread| thread.get_tid() != current.get_tid() && !thread.is_exiting())
                .filter(|thread| {
                    thread.detach();
                    thread.set_should_die()
                })
                .cloned()
                .collect()
        };
        self.big_lock.clear_waiters();
        killed
    }

    pub fn termination_status(&self) -> u8 {
        self.termination_status.load(Ordering::Acquire)
    }

    pub fn set_termination_status(&self, status: u8) {
        self.termination_status.store(status, Ordering::Release);
    }

    pub fn termination_signal(&self) -> Option<Signo> {
        Signo::try_from(self.termination_signal.load(Ordering::Acquire)).ok()
    }

    pub fn set_termination_signal(&self, signal: Option<Signo>) {
        let raw = signal.map_or(0, |signal| signal as u8);
        self.termination_signal.store(raw, Ordering::Release);
    }

    pub fn should_core_dump(&self) -> bool {
        self.should_dump_core.load(Ordering::Acquire)
    }

    pub fn set_dump_core(&self, dump: bool) {
        self.should_dump_core.store(dump, Ordering::Release);
    }

    pub fn is_dumpable(&self) -> bool {
        self.dumpable.load(Ordering::Acquire)
    }

    pub fn set_dumpable(&self, dumpable: bool) {
        self.dumpable.store(dumpable, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn set_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Whether [`Process::die`] has run.
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    /// Records that finalization has started. Returns `false` if it already had.
    pub fn mark_finalized(&self) -> bool {
        !self.finalized.swap(true, Ordering::AcqRel)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// The record a parent receives once this process has terminated.
    pub fn wait_info(&self) -> WaitInfo {
        WaitInfo::new(
            self,
            crate::wait::ChildStateChange::Terminated {
                signal: self.termination_signal(),
            },
        )
    }

    // resources

    pub fn fds(&self) -> MutexGuard<'_, FdTable> {
        self.fds.lock()
    }

    pub fn executable(&self) -> Option<CustodyRef> {
        self.resources.lock().executable.clone()
    }

    pub fn set_executable(&self, executable: Option<CustodyRef>) {
        self.resources.lock().executable = executable;
    }

    pub fn cwd(&self) -> Option<CustodyRef> {
        self.resources.lock().cwd.clone()
    }

    pub fn set_cwd(&self, cwd: CustodyRef) {
        self.resources.lock().cwd = Some(cwd);
    }

    pub fn root_directory(&self) -> Option<CustodyRef> {
        self.resources.lock().root_directory.clone()
    }

    pub fn root_directory_relative_to_global_root(&self) -> Option<CustodyRef> {
        self.resources
            .lock()
            .root_directory_relative_to_global_root
            .clone()
    }

    pub fn set_root_directory(&self, root: CustodyRef) {
        self.resources.lock().root_directory = Some(root);
    }

    pub fn set_root_directory_relative_to_global_root(&self, root: CustodyRef) {
        self.resources.lock().root_directory_relative_to_global_root = Some(root);
    }

    pub fn tty(&self) -> Option<TtyRef> {
        self.resources.lock().tty.clone()
    }

    pub fn set_tty(&self, tty: Option<TtyRef>) {
        self.resources.lock().tty = tty;
    }

    pub fn arguments(&self) -> Vec<String> {
        self.resources.lock().arguments.clone()
    }

    pub fn environment(&self) -> Vec<String> {
        self.resources.lock().environment.clone()
    }

    pub fn set_arguments_and_environment(&self, arguments: Vec<String>, environment: Vec<String>) {
        let mut resources = self.resources.lock();
        resources.arguments = arguments;
        resources.environment = environment;
    }

    pub fn address_space(&self) -> Option<AddressSpaceRef> {
        self.address_space.lock().clone()
    }

    pub fn set_address_space(&self, address_space: AddressSpaceRef) {
        *self.address_space.lock() = Some(address_space);
    }

    /// Drops the references a terminated process no longer needs: threads
    /// retained for the core dump, descriptors, filesystem and terminal
    /// handles, arguments, pending child events and children.
    pub fn release_resources(&self) {
        self.threads_for_coredump.lock().clear();
        self.fds.lock().clear();
        let released = core::mem::take(&mut *self.resources.lock());
        drop(released);
        self.wait_condition.finalize();
        self.children.lock().clear();
    }

    // performance events

    pub fn has_perf_events(&self) -> bool {
        self.perf_events.lock().is_some()
    }

    /// Installs a perf event buffer built by `create` unless one exists.
    pub fn ensure_perf_events<F>(&self, create: F)
    where
        F: FnOnce() -> Box<dyn PerfEventBuffer>,
    {
        let mut perf_events = self.perf_events.lock();
        if perf_events.is_none() {
            *perf_events = Some(create());
        }
    }

    /// Serialized perf events, `None` if there are none or they cannot be encoded.
    pub fn perf_events_json(&self, executable_path: &str) -> Option<Vec<u8>> {
        self.perf_events
            .lock()
            .as_ref()
            .and_then(|buffer| buffer.to_json(self.pid, executable_path))
    }

    // tracing

    pub fn start_tracing_from(&self, tracer: Pid) {
        *self.tracer.lock() = Some(ThreadTracer {
            tracer_pid: tracer,
            regs: None,
        });
    }

    pub fn stop_tracing(&self) {
        *self.tracer.lock() = None;
    }

    pub fn tracer(&self) -> Option<ThreadTracer> {
        *self.tracer.lock()
    }

    pub fn is_traced(&self) -> bool {
        self.tracer.lock().is_some()
    }

    /// Stops `thread` for the tracer: saves its registers and raises SIGTRAP.
    pub fn tracer_trap(&self, thread: &Thread, regs: ThreadContext) {
        match self.tracer.lock().as_mut() {
            Some(tracer) => tracer.regs = Some(regs),
            None => {
                warn!("[process] trace trap in untraced process {}", self.pid);
                return;
            }
        }
        thread.send_urgent_signal_to_self(Signo::SIGTRAP);
    }

    // alarm

    /// Arms or disarms the alarm, returning the previous timer.
    pub fn set_alarm(&self, timer: Option<TimerId>) -> Option<TimerId> {
        core::mem::replace(&mut *self.alarm_timer.lock(), timer)
    }

    pub fn take_alarm(&self) -> Option<TimerId> {
        self.alarm_timer.lock().take()
    }

    // ticks

    pub fn add_ticks(&self, user: u64, kernel: u64) {
        self.ticks_in_user.fetch_add(user, Ordering::Relaxed);
        self.ticks_in_kernel.fetch_add(kernel, Ordering::Relaxed);
    }

    pub fn ticks_in_user(&self) -> u64 {
        self.ticks_in_user.load(Ordering::Relaxed)
    }

    pub fn ticks_in_kernel(&self) -> u64 {
        self.ticks_in_kernel.load(Ordering::Relaxed)
    }

    pub fn add_dead_child_ticks(&self, user: u64, kernel: u64) {
        self.ticks_in_user_for_dead_children
            .fetch_add(user, Ordering::Relaxed);
        self.ticks_in_kernel_for_dead_children
            .fetch_add(kernel, Ordering::Relaxed);
    }

    pub fn ticks_in_user_for_dead_children(&self) -> u64 {
        self.ticks_in_user_for_dead_children.load(Ordering::Relaxed)
    }

    pub fn ticks_in_kernel_for_dead_children(&self) -> u64 {
        self.ticks_in_kernel_for_dead_children
            .load(Ordering::Relaxed)
    }

    // children

    /// Whether the process asked not to be told about its children (SA_NOCLDWAIT).
    pub fn ignores_child_notifications(&self) -> bool {
        self.ignore_child_notifications.load(Ordering::Acquire)
    }

    pub fn set_ignore_child_notifications(&self, ignore: bool) {
        self.ignore_child_notifications
            .store(ignore, Ordering::Release);
    }

    pub fn add_child(&self, child: Arc<Process>) {
        self.children.lock().insert(child.pid, child);
    }

    pub fn remove_child(&self, pid: Pid) -> Option<Arc<Process>> {
        self.children.lock().remove(&pid)
    }

    pub fn get_children(&self) -> Vec<Arc<Process>> {
        self.children.lock().values().cloned().collect()
    }

    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains_key(&pid)
    }

    pub fn big_lock(&self) -> &BigLock {
        &self.big_lock
    }

    pub fn wait_condition(&self) -> &WaitCondition {
        &self.wait_condition
    }

    /// Whether any thread is still scheduled to run.
    pub fn has_running_threads(&self) -> bool {
        self.threads
            .lock()
            .values()
            .any(|thread| thread.state() != ThreadState::Dead)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name.lock(), self.pid)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("threads", &self.thread_count())
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        assert!(
            self.alarm_timer.get_mut().is_none(),
            "[process] process {} dropped with a pending alarm",
            self.pid
        );
        trace!("[process] process {} destroyed", self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Custody, FileDescription, Tty};
    use crate::fd_table::FdFlags;
    use std::sync::Barrier;

    struct Dir(&'static str);

    impl Custody for Dir {
        fn absolute_path(&self) -> String {
            self.0.into()
        }
    }

    struct Terminal;

    impl FileDescription for Terminal {
        fn write(&self, data: &[u8]) -> LinuxResult<usize> {
            Ok(data.len())
        }
    }

    impl Tty for Terminal {
        fn tty_name(&self) -> String {
            "tty0".into()
        }

        fn open(&self) -> LinuxResult<crate::handle::FileDescriptionRef> {
            Ok(Arc::new(Terminal))
        }
    }

    fn process_with_threads(pid: Pid, extra: &[Pid]) -> Arc<Process> {
        let process = ProcessBuilder::new(pid, "app").parent(1).fd_capacity(8).build();
        process.create_main_thread();
        for &tid in extra {
            process.create_thread(tid, "worker".into());
        }
        process
    }

    #[test]
    fn signal_goes_to_live_main_thread() {
        let process = process_with_threads(10, &[11]);
        let receiver = process.send_signal(Signo::SIGTERM, 1).unwrap();
        assert_eq!(receiver.get_tid(), 10);
        assert_eq!(receiver.dequeue_signal(), Some(Signo::SIGTERM));
    }

    #[test]
    fn signal_falls_back_to_surviving_thread() {
        let process = process_with_threads(10, &[11, 12]);
        process.get_main_thread().unwrap().set_state(ThreadState::Dead);
        let receiver = process.signal_receiver().unwrap();
        assert_ne!(receiver.get_tid(), 10);
        assert!(!receiver.is_dead());
    }

    #[test]
    fn signal_to_process_without_live_threads_fails() {
        let process = process_with_threads(10, &[]);
        process.get_main_thread().unwrap().set_state(ThreadState::Dead);
        assert_eq!(
            process.send_signal(Signo::SIGKILL, 1).err(),
            Some(LinuxError::ESRCH)
        );
    }

    #[test]
    fn die_retains_threads_and_drops_tty() {
        let process = process_with_threads(10, &[11]);
        process.set_tty(Some(Arc::new(Terminal)));
        let killed = process.die();
        assert_eq!(killed.len(), 2);
        assert!(process.tty().is_none());
        assert!(process.get_threads().iter().all(|t| t.should_die() && t.is_detached()));
        assert_eq!(process.threads_for_coredump().len(), 2);
        assert!(process.die().is_empty());
        assert_eq!(process.threads_for_coredump().len(), 2);
    }

    #[test]
    fn threads_are_only_added_while_running() {
        let process = process_with_threads(10, &[]);
        let worker = process.try_create_thread(11, "worker".into()).unwrap();
        assert_eq!(process.thread_count(), 2);

        assert!(!process.remove_thread(worker.get_tid()));
        assert!(process.remove_thread(10));
        assert_eq!(
            process.try_create_thread(12, "late".into()).err(),
            Some(LinuxError::ESRCH)
        );
        assert_eq!(process.thread_count(), 0);
    }

    #[test]
    fn dying_process_rejects_new_threads() {
        let process = process_with_threads(10, &[11]);
        assert!(!process.is_dying());
        process.die();
        assert!(process.is_dying());
        assert_eq!(
            process.try_create_thread(12, "late".into()).err(),
            Some(LinuxError::ESRCH)
        );
        assert_eq!(process.thread_count(), 2);
    }

    #[test]
    fn concurrent_die_retains_each_thread_once() {
        let process = process_with_threads(10, &[11, 12, 13]);
        let barrier = Arc::new(Barrier::new(4));
        let dyers: Vec<_> = (0..4)
            .map(|_| {
                let process = process.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    process.die().len()
                })
            })
            .collect();
        let killed: usize = dyers.into_iter().map(|d| d.join().unwrap()).sum();
        assert_eq!(killed, 4);
        assert_eq!(process.threads_for_coredump().len(), 4);
    }

    #[test]
    fn kill_except_self_spares_caller_and_exiting_threads() {
        let process = process_with_threads(10, &[11, 12]);
        let current = process.get_main_thread().unwrap();
        process.get_thread(12).unwrap().set_state(ThreadState::Dying);
        let killed = process.kill_threads_except_self(&current);
        assert_eq!(killed.len(), 1);
        assert_eq!(killed[0].get_tid(), 11);
        assert!(!current.should_die());

        let lone = process_with_threads(20, &[]);
        let only = lone.get_main_thread().unwrap();
        assert!(lone.kill_threads_except_self(&only).is_empty());
    }

    #[test]
    fn removing_last_thread_is_reported() {
        let process = process_with_threads(10, &[11]);
        assert!(!process.remove_thread(11));
        assert!(!process.remove_thread(11));
        assert!(process.remove_thread(10));
        assert_eq!(process.thread_count(), 0);
    }

    #[test]
    fn termination_signal_round_trips_through_wait_info() {
        let process = process_with_threads(10, &[]);
        process.set_termination_status(0);
        process.set_termination_signal(Some(Signo::SIGSEGV));
        let info = process.wait_info();
        assert_eq!(info.pid, 10);
        assert_eq!(info.status, Signo::SIGSEGV as i32);
        assert_eq!(info.code, linux_raw_sys::general::CLD_KILLED);
        process.set_termination_signal(None);
        assert_eq!(process.wait_info().code, linux_raw_sys::general::CLD_EXITED);
    }

    #[test]
    fn release_resources_drops_handles() {
        let process = ProcessBuilder::new(3, "sh")
            .cwd(Some(Arc::new(Dir("/home"))))
            .fd_capacity(4)
            .build();
        process
            .fds()
            .set(0, Arc::new(Terminal), FdFlags::empty())
            .unwrap();
        process.set_arguments_and_environment(vec!["sh".into()], vec![]);
        process.add_child(ProcessBuilder::new(4, "child").parent(3).build());
        process.release_resources();
        assert!(process.cwd().is_none());
        assert_eq!(process.fds().capacity(), 0);
        assert!(process.arguments().is_empty());
        assert!(process.get_children().is_empty());
        assert!(process.wait_condition().is_finalized());
    }

    #[test]
    fn tracer_trap_saves_registers_and_raises_sigtrap() {
        let process = process_with_threads(10, &[]);
        let thread = process.get_main_thread().unwrap();
        process.start_tracing_from(1);
        let regs = ThreadContext {
            arg: 42,
            ..ThreadContext::empty()
        };
        process.tracer_trap(&thread, regs);
        assert_eq!(process.tracer().and_then(|t| t.regs()), Some(regs));
        assert_eq!(thread.dequeue_signal(), Some(Signo::SIGTRAP));
        process.stop_tracing();
        assert!(!process.is_traced());
    }

    #[test]
    fn finalization_is_marked_once() {
        let process = process_with_threads(10, &[]);
        assert!(process.mark_finalized());
        assert!(!process.mark_finalized());
    }

    #[test]
    #[should_panic(expected = "pending alarm")]
    fn dropping_with_armed_alarm_panics() {
        let process = process_with_threads(10, &[]);
        process.set_alarm(Some(TimerId(1)));
        drop(process);
    }

    #[test]
    fn display_shows_name_and_pid() {
        let process = ProcessBuilder::new(42, "init").build();
        assert_eq!(std::format!("{}", process), "init(42)");
    }
}
