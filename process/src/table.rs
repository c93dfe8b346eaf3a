use crate::Pid;
use crate::process::Process;
use crate::thread::Thread;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::{LinuxError, LinuxResult};
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// Largest id handed out. Ids are never reused, so the table stops
/// allocating once it is reached.
pub const PID_MAX: Pid = i32::MAX as Pid;

/// Registry of live processes, keyed by pid.
///
/// The table holds one reference to every registered process. The lock is
/// held only for the map operation itself.
pub struct ProcessTable {
    next_pid: AtomicU32,
    processes: Mutex<BTreeMap<Pid, Arc<Process>>>,
}

impl ProcessTable {
    /// A table whose first allocated id is 1. Id 0 belongs to the idle process.
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    pub const fn starting_at(first_pid: Pid) -> Self {
        Self {
            next_pid: AtomicU32::new(first_pid),
            processes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Hands out the next process or thread id.
    ///
    /// Ids increase strictly. Fails with `EAGAIN` once [`PID_MAX`] has been
    /// handed out.
    pub fn allocate_pid(&self) -> LinuxResult<Pid> {
        self.next_pid
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next <= PID_MAX).then_some(next + 1)
            })
            .map_err(|_| {
                warn!("[process] pid space exhausted");
                LinuxError::EAGAIN
            })
    }

    pub fn register(&self, process: Arc<Process>) {
        let pid = process.get_pid();
        let mut processes = self.processes.lock();
        if processes.contains_key(&pid) {
            panic!("[process] process with id {} already exists", pid);
        }
        processes.insert(pid, process);
    }

    /// Drops the table's reference to `pid`.
    pub fn unregister(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().get(&pid).cloned()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    pub fn all_processes(&self) -> Vec<Arc<Process>> {
        self.processes.lock().values().cloned().collect()
    }

    pub fn all_pids(&self) -> Vec<Pid> {
        self.processes.lock().keys().copied().collect()
    }

    /// Looks a thread up by tid across every registered process.
    pub fn find_thread(&self, tid: Pid) -> Option<Arc<Thread>> {
        self.all_processes()
            .into_iter()
            .find_map(|process| process.get_thread(tid))
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessBuilder;
    use std::collections::BTreeSet;
    use std::sync::Barrier;

    #[test]
    fn pids_increase_strictly() {
        let table = ProcessTable::new();
        let pids: Vec<_> = (0..16).map(|_| table.allocate_pid().unwrap()).collect();
        assert_eq!(pids[0], 1);
        assert!(pids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn concurrent_allocation_yields_unique_pids() {
        let table = Arc::new(ProcessTable::new());
        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..500)
                        .map(|_| table.allocate_pid().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = BTreeSet::new();
        for worker in workers {
            let pids = worker.join().unwrap();
            assert!(pids.windows(2).all(|pair| pair[0] < pair[1]));
            for pid in pids {
                assert!(seen.insert(pid), "pid {} handed out twice", pid);
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn exhausted_pid_space_is_rejected() {
        let table = ProcessTable::starting_at(PID_MAX - 1);
        assert_eq!(table.allocate_pid(), Ok(PID_MAX - 1));
        assert_eq!(table.allocate_pid(), Ok(PID_MAX));
        assert_eq!(table.allocate_pid(), Err(LinuxError::EAGAIN));
        assert_eq!(table.allocate_pid(), Err(LinuxError::EAGAIN));
    }

    #[test]
    fn lookup_tracks_registration() {
        let table = ProcessTable::new();
        let pid = table.allocate_pid().unwrap();
        let process = ProcessBuilder::new(pid, "init").build();
        let thread = process.create_main_thread();
        assert!(table.get(pid).is_none());
        table.register(process.clone());
        assert_eq!(table.all_pids(), vec![pid]);
        assert!(Arc::ptr_eq(&table.get(pid).unwrap(), &process));
        assert!(Arc::ptr_eq(&table.find_thread(pid).unwrap(), &thread));
        assert!(table.unregister(pid).is_some());
        assert!(table.get(pid).is_none());
        assert!(table.is_empty());
        assert_eq!(Arc::strong_count(&process), 1);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn duplicate_registration_panics() {
        let table = ProcessTable::new();
        table.register(ProcessBuilder::new(3, "a").build());
        table.register(ProcessBuilder::new(3, "b").build());
    }
}
