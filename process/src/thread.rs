use crate::Pid;
use crate::process::Process;
use crate::signal::{SignalSet, Signo};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use memory_addr::VirtAddr;
use num_enum::TryFromPrimitive;
use spin::Mutex;

/// Priority given to threads that do not ask for one.
pub const DEFAULT_PRIORITY: u32 = 30;

/// Scheduler-visible lifecycle state of a thread.
///
/// The scheduler drives the transitions; this crate only observes them and
/// requests death.
#[repr(u8)]
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Runnable = 0,
    Running,
    Blocked,
    Stopped,
    Dying,
    Dead,
}

/// Registers a thread resumes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContext {
    /// Instruction pointer
    pub ip: VirtAddr,
    /// Stack pointer
    pub sp: VirtAddr,
    /// First argument register
    pub arg: usize,
}

impl ThreadContext {
    pub const fn empty() -> Self {
        Self {
            ip: VirtAddr::from_usize(0),
            sp: VirtAddr::from_usize(0),
            arg: 0,
        }
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct Thread {
    tid: Pid,
    process: Weak<Process>,
    name: Mutex<String>,
    state: AtomicU8,
    should_die: AtomicBool,
    detached: AtomicBool,
    priority: AtomicU32,
    affinity: AtomicU32,
    context: Mutex<ThreadContext>,
    pending_signals: AtomicU32,
    last_signal_sender: AtomicU32,
    exit_status: Mutex<Option<u8>>,
}

impl Thread {
    pub(crate) fn new(tid: Pid, process: &Arc<Process>, name: String) -> Arc<Self> {
        Arc::new(Self {
            tid,
            process: Arc::downgrade(process),
            name: Mutex::new(name),
            state: AtomicU8::new(ThreadState::Runnable as u8),
            should_die: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            priority: AtomicU32::new(DEFAULT_PRIORITY),
            affinity: AtomicU32::new(u32::MAX),
            context: Mutex::new(ThreadContext::empty()),
            pending_signals: AtomicU32::new(0),
            last_signal_sender: AtomicU32::new(0),
            exit_status: Mutex::new(None),
        })
    }

    pub fn get_tid(&self) -> Pid {
        self.tid
    }

    /// The owning process, unless it has already been destroyed.
    pub fn get_process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Check if the thread is the main thread of the process.
    /// The main thread's tid equals the pid of its process.
    pub fn is_main_thread(&self) -> bool {
        self.get_process()
            .is_some_and(|process| process.get_pid() == self.tid)
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(ThreadState::Dead)
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.state() == ThreadState::Dead
    }

    /// Dying or dead.
    pub fn is_exiting(&self) -> bool {
        matches!(self.state(), ThreadState::Dying | ThreadState::Dead)
    }

    /// The status passed to `exit`, if the thread left through it.
    pub fn exit_status(&self) -> Option<u8> {
        *self.exit_status.lock()
    }

    pub fn set_exit_status(&self, status: u8) {
        *self.exit_status.lock() = Some(status);
    }

    /// Asks the thread to die at its next opportunity.
    /// Returns `true` only for the call that set the request.
    pub fn set_should_die(&self) -> bool {
        !self.should_die.swap(true, Ordering::AcqRel)
    }

    pub fn should_die(&self) -> bool {
        self.should_die.load(Ordering::Acquire)
    }

    /// Nobody will join this thread. Returns `true` only the first time.
    pub fn detach(&self) -> bool {
        !self.detached.swap(true, Ordering::AcqRel)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn affinity(&self) -> u32 {
        self.affinity.load(Ordering::Relaxed)
    }

    pub fn set_affinity(&self, affinity: u32) {
        self.affinity.store(affinity, Ordering::Relaxed);
    }

    pub fn context(&self) -> ThreadContext {
        *self.context.lock()
    }

    pub fn set_context(&self, context: ThreadContext) {
        *self.context.lock() = context;
    }

    /// Marks `signo` pending on this thread.
    pub fn send_signal(&self, signo: Signo, sender: Pid) {
        self.last_signal_sender.store(sender, Ordering::Relaxed);
        self.pending_signals.fetch_or(signo.mask(), Ordering::AcqRel);
    }

    /// Raises `signo` on the current thread on behalf of the kernel.
    pub fn send_urgent_signal_to_self(&self, signo: Signo) {
        self.send_signal(signo, self.tid);
    }

    pub fn pending_signals(&self) -> SignalSet {
        SignalSet::from_bits(self.pending_signals.load(Ordering::Acquire))
    }

    pub fn last_signal_sender(&self) -> Pid {
        self.last_signal_sender.load(Ordering::Relaxed)
    }

    /// Removes and returns the lowest-numbered pending signal.
    pub fn dequeue_signal(&self) -> Option<Signo> {
        let previous = self
            .pending_signals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits != 0).then(|| bits & (bits - 1))
            })
            .ok()?;
        SignalSet::from_bits(previous).lowest()
    }

    /// Creates the single thread of a forked `process` as a copy of this one.
    ///
    /// The copy takes the child's pid as its tid and keeps the name, priority,
    /// affinity and register context. Pending signals are not inherited.
    pub fn fork_into(&self, process: &Arc<Process>) -> Arc<Thread> {
        let thread = Thread::new(process.get_pid(), process, self.name());
        thread.set_priority(self.priority());
        thread.set_affinity(self.affinity());
        thread.set_context(self.context());
        process.add_thread(thread.clone());
        thread
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("state", &self.state())
            .finish()
    }
}
