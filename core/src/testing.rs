//! Hosted stand-ins for the services a [`Kernel`] needs, for tests.
//!
//! Collaborators that matter for ordering append to a shared [`EventLog`].

use crate::config::KernelConfig;
use crate::interface::{
    Clock, Collaborators, CoreDumpWriter, ImageLoader, PerfEvents, Scheduler, Symbol, SymbolTable,
    TimerQueue, UserMemory, Vfs, VirtualMemory,
};
use crate::kernel::Kernel;
use axerrno::{LinuxError, LinuxResult};
use kestrel_process::handle::{
    AddressSpace, AddressSpaceRef, Custody, CustodyRef, FileDescription, FileDescriptionRef,
    PerfEventBuffer, TimerId, Tty,
};
use kestrel_process::{Gid, Pid, Process, Thread, ThreadContext, ThreadState, Uid, WaitQueue};
use memory_addr::VirtAddr;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Ordered record of observable side effects.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first event starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .position(|event| event.starts_with(prefix))
    }
}

/// Wait queue that parks OS threads on a condition variable.
#[derive(Default)]
pub struct CondvarWaitQueue {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl WaitQueue for CondvarWaitQueue {
    fn wait_until(&self, condition: &mut dyn FnMut() -> bool) {
        loop {
            let seen = *self.generation.lock().unwrap();
            if condition() {
                return;
            }
            let generation = self.generation.lock().unwrap();
            let _ = self
                .condvar
                .wait_timeout_while(generation, Duration::from_millis(20), |current| {
                    *current == seen
                })
                .unwrap();
        }
    }

    fn notify_all(&self) {
        *self.generation.lock().unwrap() += 1;
        self.condvar.notify_all();
    }
}

/// Payload unwound by [`FakeScheduler::exit_current`].
#[derive(Debug)]
pub struct ThreadExit;

/// Runs `f`, turning a [`ThreadExit`] unwind into `Err(())`.
pub fn catch_thread_exit<R>(f: impl FnOnce() -> R) -> Result<R, ()> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        if !payload.is::<ThreadExit>() {
            std::panic::resume_unwind(payload);
        }
    })
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

#[derive(Default)]
pub struct FakeScheduler {
    events: EventLog,
    runnable: Mutex<Vec<(Pid, u32)>>,
    woken: Mutex<Vec<Pid>>,
}

impl FakeScheduler {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Makes `thread` the current thread of the calling OS thread.
    pub fn set_current(&self, thread: Option<Arc<Thread>>) {
        CURRENT.with(|current| *current.borrow_mut() = thread);
    }

    pub fn runnable(&self) -> Vec<(Pid, u32)> {
        self.runnable.lock().unwrap().clone()
    }

    pub fn woken(&self) -> Vec<Pid> {
        self.woken.lock().unwrap().clone()
    }
}

impl Scheduler for FakeScheduler {
    fn current_thread(&self) -> Option<Arc<Thread>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    fn set_runnable(&self, thread: &Arc<Thread>, affinity: u32) {
        thread.set_state(ThreadState::Runnable);
        self.runnable.lock().unwrap().push((thread.get_tid(), affinity));
        self.events.push(format!("runnable {}", thread.get_tid()));
    }

    fn wake(&self, thread: &Arc<Thread>) {
        self.woken.lock().unwrap().push(thread.get_tid());
        self.events.push(format!("wake {}", thread.get_tid()));
    }

    fn new_wait_queue(&self) -> Arc<dyn WaitQueue> {
        Arc::new(CondvarWaitQueue::default())
    }

    fn exit_current(&self) -> ! {
        if let Some(thread) = self.current_thread() {
            thread.set_state(ThreadState::Dying);
            self.events.push(format!("exit {}", thread.get_tid()));
        }
        std::panic::resume_unwind(Box::new(ThreadExit))
    }
}

pub struct FakeAddressSpace {
    events: EventLog,
    regions_removed: AtomicBool,
}

impl FakeAddressSpace {
    pub fn regions_removed(&self) -> bool {
        self.regions_removed.load(Ordering::Acquire)
    }
}

impl AddressSpace for FakeAddressSpace {
    fn try_clone(&self) -> LinuxResult<AddressSpaceRef> {
        Ok(Arc::new(FakeAddressSpace {
            events: self.events.clone(),
            regions_removed: AtomicBool::new(false),
        }))
    }

    fn remove_all_regions(&self) {
        self.regions_removed.store(true, Ordering::Release);
        self.events.push("remove_regions".into());
    }

    fn dump_regions(&self) {
        self.events.push("dump_regions".into());
    }
}

#[derive(Default)]
pub struct FakeVm {
    events: EventLog,
    created: AtomicUsize,
    fail: AtomicBool,
}

impl FakeVm {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::Release);
    }
}

impl VirtualMemory for FakeVm {
    fn create_address_space(&self) -> LinuxResult<AddressSpaceRef> {
        if self.fail.swap(false, Ordering::AcqRel) {
            return Err(LinuxError::ENOMEM);
        }
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(FakeAddressSpace {
            events: self.events.clone(),
            regions_removed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
pub struct FakeCustody(pub String);

impl Custody for FakeCustody {
    fn absolute_path(&self) -> String {
        self.0.clone()
    }
}

/// An in-memory file.
#[derive(Default)]
pub struct FakeFile {
    pub name: String,
    pub mode: u32,
    data: Mutex<Vec<u8>>,
}

impl FakeFile {
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ..Self::default()
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl FileDescription for FakeFile {
    fn write(&self, data: &[u8]) -> LinuxResult<usize> {
        self.data.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }
}

pub struct FakeTty {
    name: String,
    opened: AtomicUsize,
}

impl FakeTty {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            opened: AtomicUsize::new(0),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

impl Tty for FakeTty {
    fn tty_name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> LinuxResult<FileDescriptionRef> {
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(FakeFile::named(&self.name))
    }
}

pub struct FakeVfs {
    root: CustodyRef,
    files: Mutex<BTreeMap<String, Arc<FakeFile>>>,
}

impl Default for FakeVfs {
    fn default() -> Self {
        Self {
            root: Arc::new(FakeCustody("/".into())),
            files: Mutex::new(BTreeMap::new()),
        }
    }
}

impl FakeVfs {
    pub fn file(&self, path: &str) -> Option<Arc<FakeFile>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl Vfs for FakeVfs {
    fn root_custody(&self) -> CustodyRef {
        self.root.clone()
    }

    fn open_null_device(&self) -> LinuxResult<FileDescriptionRef> {
        Ok(FakeFile::named("/dev/null"))
    }

    fn open_exclusive(
        &self,
        path: &str,
        base: Option<&CustodyRef>,
        _uid: Uid,
        _gid: Gid,
        mode: u32,
    ) -> LinuxResult<FileDescriptionRef> {
        let absolute = match base {
            Some(base) if !path.starts_with('/') => {
                format!("{}/{}", base.absolute_path().trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        };
        let mut files = self.files.lock().unwrap();
        if files.contains_key(&absolute) {
            return Err(LinuxError::EEXIST);
        }
        let file = Arc::new(FakeFile {
            name: absolute.clone(),
            mode,
            data: Mutex::new(Vec::new()),
        });
        files.insert(absolute, file.clone());
        Ok(file)
    }
}

/// Entry address the loader gives every image.
pub const FAKE_IMAGE_ENTRY: usize = 0x40_0000;

#[derive(Default)]
pub struct FakeLoader {
    fail_with: Mutex<Option<LinuxError>>,
    loaded: Mutex<Vec<String>>,
}

impl FakeLoader {
    pub fn fail_next(&self, error: LinuxError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }
}

impl ImageLoader for FakeLoader {
    fn exec(
        &self,
        process: &Arc<Process>,
        thread: &Arc<Thread>,
        path: &str,
        _arguments: &[String],
        _environment: &[String],
    ) -> LinuxResult<()> {
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        process.set_executable(Some(Arc::new(FakeCustody(path.into()))));
        thread.set_context(ThreadContext {
            ip: VirtAddr::from_usize(FAKE_IMAGE_ENTRY),
            ..ThreadContext::empty()
        });
        self.loaded.lock().unwrap().push(path.into());
        Ok(())
    }
}

/// What a core dump saw of its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDumpRecord {
    pub path: String,
    pub pid: Pid,
    pub process_was_dead: bool,
    pub threads: usize,
}

#[derive(Default)]
pub struct FakeCoreDumpWriter {
    events: EventLog,
    dumps: Mutex<Vec<CoreDumpRecord>>,
    fail: AtomicBool,
}

impl FakeCoreDumpWriter {
    pub fn dumps(&self) -> Vec<CoreDumpRecord> {
        self.dumps.lock().unwrap().clone()
    }

    pub fn fail_always(&self) {
        self.fail.store(true, Ordering::Release);
    }
}

impl CoreDumpWriter for FakeCoreDumpWriter {
    fn write(&self, process: &Process, path: &str) -> LinuxResult<()> {
        if self.fail.load(Ordering::Acquire) {
            return Err(LinuxError::EIO);
        }
        self.events.push(format!("core_dump {}", path));
        self.dumps.lock().unwrap().push(CoreDumpRecord {
            path: path.into(),
            pid: process.get_pid(),
            process_was_dead: process.is_dead(),
            threads: process.threads_for_coredump().len(),
        });
        Ok(())
    }
}

pub struct FakePerfBuffer;

impl PerfEventBuffer for FakePerfBuffer {
    fn to_json(&self, pid: Pid, executable_path: &str) -> Option<Vec<u8>> {
        Some(format!("{{\"pid\":{},\"executable\":\"{}\"}}", pid, executable_path).into_bytes())
    }
}

#[derive(Default)]
pub struct FakePerfEvents;

impl PerfEvents for FakePerfEvents {
    fn create_buffer(&self) -> Box<dyn PerfEventBuffer> {
        Box::new(FakePerfBuffer)
    }
}

#[derive(Default)]
pub struct FakeTimerQueue {
    cancelled: Mutex<Vec<TimerId>>,
}

impl FakeTimerQueue {
    pub fn cancelled(&self) -> Vec<TimerId> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl TimerQueue for FakeTimerQueue {
    fn cancel(&self, timer: TimerId) -> bool {
        self.cancelled.lock().unwrap().push(timer);
        true
    }
}

/// Clock standing still at a settable time.
pub struct FakeClock(pub AtomicU64);

impl Clock for FakeClock {
    fn now_secs(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Symbols sorted by address.
#[derive(Default)]
pub struct FakeSymbols(pub Vec<Symbol>);

impl SymbolTable for FakeSymbols {
    fn symbolicate(&self, address: VirtAddr) -> Option<Symbol> {
        self.0
            .iter()
            .take_while(|symbol| symbol.address <= address)
            .last()
            .cloned()
    }
}

/// User memory holding NUL-free strings at fixed addresses.
#[derive(Default)]
pub struct FakeUserMemory {
    strings: Mutex<BTreeMap<usize, String>>,
    written: Mutex<BTreeMap<usize, Vec<u8>>>,
}

impl FakeUserMemory {
    pub fn put(&self, address: usize, string: &str) {
        self.strings.lock().unwrap().insert(address, string.into());
    }

    /// The bytes last copied to `address`.
    pub fn written(&self, address: usize) -> Option<Vec<u8>> {
        self.written.lock().unwrap().get(&address).cloned()
    }
}

impl UserMemory for FakeUserMemory {
    fn copy_string_from_user(&self, address: VirtAddr, len: usize) -> Option<String> {
        let strings = self.strings.lock().unwrap();
        let string = strings.get(&address.as_usize())?;
        string.get(..len).map(String::from)
    }

    fn copy_to_user(&self, address: VirtAddr, bytes: &[u8]) -> bool {
        if address.as_usize() == 0 {
            return false;
        }
        self.written
            .lock()
            .unwrap()
            .insert(address.as_usize(), bytes.to_vec());
        true
    }
}

/// Time [`Harness`] clocks start at.
pub const HARNESS_TIME: u64 = 1_700_000_000;

/// A [`Kernel`] wired to fakes, with handles to every fake.
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub events: EventLog,
    pub scheduler: Arc<FakeScheduler>,
    pub memory: Arc<FakeVm>,
    pub vfs: Arc<FakeVfs>,
    pub loader: Arc<FakeLoader>,
    pub core_dumps: Arc<FakeCoreDumpWriter>,
    pub timers: Arc<FakeTimerQueue>,
    pub user_memory: Arc<FakeUserMemory>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_symbols(symbols: Vec<Symbol>) -> Self {
        Self::build(KernelConfig::default(), Some(Arc::new(FakeSymbols(symbols))))
    }

    fn build(config: KernelConfig, symbols: Option<Arc<dyn SymbolTable>>) -> Self {
        let events = EventLog::default();
        let scheduler = Arc::new(FakeScheduler::new(events.clone()));
        let memory = Arc::new(FakeVm {
            events: events.clone(),
            ..FakeVm::default()
        });
        let vfs = Arc::new(FakeVfs::default());
        let loader = Arc::new(FakeLoader::default());
        let core_dumps = Arc::new(FakeCoreDumpWriter {
            events: events.clone(),
            ..FakeCoreDumpWriter::default()
        });
        let timers = Arc::new(FakeTimerQueue::default());
        let user_memory = Arc::new(FakeUserMemory::default());
        let collaborators = Collaborators {
            scheduler: scheduler.clone(),
            memory: memory.clone(),
            vfs: vfs.clone(),
            loader: loader.clone(),
            core_dumps: core_dumps.clone(),
            perf_events: Arc::new(FakePerfEvents),
            timers: timers.clone(),
            clock: Arc::new(FakeClock(AtomicU64::new(HARNESS_TIME))),
            symbols,
            user_memory: user_memory.clone(),
        };
        Self {
            kernel: Arc::new(Kernel::new(config, collaborators)),
            events,
            scheduler,
            memory,
            vfs,
            loader,
            core_dumps,
            timers,
            user_memory,
        }
    }

    /// Creates a user process of uid/gid 100 under `parent`.
    pub fn spawn(&self, path: &str, parent: Pid) -> (Arc<Process>, Arc<Thread>) {
        self.kernel
            .create_user_process(path, 100, 100, parent, Vec::new(), Vec::new(), None)
            .unwrap()
    }

    /// Makes `thread` current on the calling OS thread.
    pub fn run_as(&self, thread: &Arc<Thread>) {
        self.scheduler.set_current(Some(thread.clone()));
    }

    /// Reports every remaining thread of `process` as exited, as the
    /// scheduler would once they have all run to completion.
    pub fn exit_all_threads(&self, process: &Process) {
        for thread in process.get_threads() {
            self.kernel.thread_exited(&thread);
        }
    }

    /// Exits every thread of `process` and runs the finalizer.
    pub fn reap_threads_and_finalize(&self, process: &Process) -> usize {
        self.exit_all_threads(process);
        self.kernel.finalize_pending()
    }
}
