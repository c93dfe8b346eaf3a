//! Services the lifecycle core consumes from the rest of the kernel.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use axerrno::LinuxResult;
use kestrel_process::handle::{
    AddressSpaceRef, CustodyRef, FileDescriptionRef, PerfEventBuffer, TimerId,
};
use kestrel_process::{Gid, Process, Thread, Uid, WaitQueue};
use memory_addr::VirtAddr;

pub trait Scheduler: Send + Sync {
    /// The thread running on this CPU, `None` before scheduling starts.
    fn current_thread(&self) -> Option<Arc<Thread>>;

    /// Makes `thread` eligible to run on the CPUs in `affinity`.
    fn set_runnable(&self, thread: &Arc<Thread>, affinity: u32);

    /// Interrupts a blocked thread so that it notices pending signals or a
    /// death request.
    fn wake(&self, thread: &Arc<Thread>);

    fn new_wait_queue(&self) -> Arc<dyn WaitQueue>;

    /// Ends the current thread. The scheduler reports the exit through
    /// [`crate::Kernel::thread_exited`].
    fn exit_current(&self) -> !;
}

pub trait VirtualMemory: Send + Sync {
    fn create_address_space(&self) -> LinuxResult<AddressSpaceRef>;
}

pub trait Vfs: Send + Sync {
    fn root_custody(&self) -> CustodyRef;

    fn open_null_device(&self) -> LinuxResult<FileDescriptionRef>;

    /// Creates and opens `path` for writing, failing if it already exists.
    /// Relative paths are resolved against `base`.
    fn open_exclusive(
        &self,
        path: &str,
        base: Option<&CustodyRef>,
        uid: Uid,
        gid: Gid,
        mode: u32,
    ) -> LinuxResult<FileDescriptionRef>;
}

pub trait ImageLoader: Send + Sync {
    /// Replaces the image of `process` with the executable at `path`, and
    /// sets `thread` up to start it.
    fn exec(
        &self,
        process: &Arc<Process>,
        thread: &Arc<Thread>,
        path: &str,
        arguments: &[String],
        environment: &[String],
    ) -> LinuxResult<()>;
}

pub trait CoreDumpWriter: Send + Sync {
    /// Writes a core file describing `process` to `path`, creating it exclusively.
    fn write(&self, process: &Process, path: &str) -> LinuxResult<()>;
}

pub trait PerfEvents: Send + Sync {
    fn create_buffer(&self) -> Box<dyn PerfEventBuffer>;
}

pub trait TimerQueue: Send + Sync {
    /// Returns `false` if the timer had already fired.
    fn cancel(&self, timer: TimerId) -> bool;
}

pub trait Clock: Send + Sync {
    /// Wall-clock time in seconds since the epoch.
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: VirtAddr,
}

pub trait SymbolTable: Send + Sync {
    /// The symbol containing `address`.
    fn symbolicate(&self, address: VirtAddr) -> Option<Symbol>;
}

pub trait UserMemory: Send + Sync {
    /// Copies `len` bytes at `address` in the current address space, `None`
    /// if they are not readable or not UTF-8.
    fn copy_string_from_user(&self, address: VirtAddr, len: usize) -> Option<String>;

    /// Copies `bytes` to `address` in the current address space. Returns
    /// `false` if the range is not writable.
    fn copy_to_user(&self, address: VirtAddr, bytes: &[u8]) -> bool;
}

/// Every service a [`crate::Kernel`] is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn Scheduler>,
    pub memory: Arc<dyn VirtualMemory>,
    pub vfs: Arc<dyn Vfs>,
    pub loader: Arc<dyn ImageLoader>,
    pub core_dumps: Arc<dyn CoreDumpWriter>,
    pub perf_events: Arc<dyn PerfEvents>,
    pub timers: Arc<dyn TimerQueue>,
    pub clock: Arc<dyn Clock>,
    pub symbols: Option<Arc<dyn SymbolTable>>,
    pub user_memory: Arc<dyn UserMemory>,
}
