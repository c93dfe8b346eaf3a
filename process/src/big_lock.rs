//! The coarse per-process execution lock.
//!
//! Threads of a process that have not opted into finer locking serialize on
//! it. When sibling threads are killed the waiters are cleared, so that none
//! of them stays blocked behind a lock it will never get.

use crate::Pid;
use crate::wait::WaitQueue;
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use spin::Mutex;

#[derive(Default)]
struct BigLockState {
    holder: Option<Pid>,
    waiters: BTreeSet<Pid>,
}

pub struct BigLock {
    state: Mutex<BigLockState>,
    queue: Arc<dyn WaitQueue>,
}

/// Releases the big lock when dropped.
pub struct BigLockGuard<'a> {
    lock: &'a BigLock,
}

impl BigLock {
    pub fn new(queue: Arc<dyn WaitQueue>) -> Self {
        Self {
            state: Mutex::new(BigLockState::default()),
            queue,
        }
    }

    /// Acquires the lock for thread `tid`, blocking while another thread holds it.
    ///
    /// Fails with `EDEADLK` if `tid` already holds it and with `EINTR` if the
    /// wait was cancelled by [`BigLock::clear_waiters`].
    pub fn lock(&self, tid: Pid) -> LinuxResult<BigLockGuard<'_>> {
        {
            let mut state = self.state.lock();
            match state.holder {
                Some(holder) if holder == tid => return Err(LinuxError::EDEADLK),
                Some(_) => {
                    state.waiters.insert(tid);
                }
                None => {
                    state.holder = Some(tid);
                    return Ok(BigLockGuard { lock: self });
                }
            }
        }

        let mut outcome = Err(LinuxError::EINTR);
        self.queue.wait_until(&mut || {
            let mut state = self.state.lock();
            if !state.waiters.contains(&tid) {
                outcome = Err(LinuxError::EINTR);
                return true;
            }
            if state.holder.is_none() {
                state.waiters.remove(&tid);
                state.holder = Some(tid);
                outcome = Ok(());
                return true;
            }
            false
        });
        outcome.map(|()| BigLockGuard { lock: self })
    }

    pub fn try_lock(&self, tid: Pid) -> Option<BigLockGuard<'_>> {
        let mut state = self.state.lock();
        if state.holder.is_some() {
            return None;
        }
        state.holder = Some(tid);
        Some(BigLockGuard { lock: self })
    }

    pub fn holder(&self) -> Option<Pid> {
        self.state.lock().holder
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Cancels every pending acquisition. Returns how many were cancelled.
    pub fn clear_waiters(&self) -> usize {
        let cleared = {
            let mut state = self.state.lock();
            let cleared = state.waiters.len();
            state.waiters.clear();
            cleared
        };
        if cleared > 0 {
            debug!("[process] cleared {} big lock waiters", cleared);
            self.queue.notify_all();
        }
        cleared
    }
}

impl Drop for BigLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.lock().holder = None;
        self.lock.queue.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::SpinWaitQueue;
    use std::time::Duration;

    fn big_lock() -> Arc<BigLock> {
        Arc::new(BigLock::new(Arc::new(SpinWaitQueue)))
    }

    #[test]
    fn relocking_by_holder_is_a_deadlock() {
        let lock = big_lock();
        let guard = lock.lock(7).unwrap();
        assert_eq!(lock.holder(), Some(7));
        assert_eq!(lock.lock(7).err(), Some(LinuxError::EDEADLK));
        assert!(lock.try_lock(8).is_none());
        drop(guard);
        assert_eq!(lock.holder(), None);
        assert!(lock.try_lock(8).is_some());
    }

    #[test]
    fn waiter_acquires_after_release() {
        let lock = big_lock();
        let guard = lock.lock(1).unwrap();
        let waiter = {
            let lock = lock.clone();
            std::thread::spawn(move || lock.lock(2).map(|_guard| ()).is_ok())
        };
        while lock.waiter_count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn clearing_waiters_interrupts_them() {
        let lock = big_lock();
        let _guard = lock.lock(1).unwrap();
        let waiter = {
            let lock = lock.clone();
            std::thread::spawn(move || lock.lock(2).err())
        };
        while lock.waiter_count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lock.clear_waiters(), 1);
        assert_eq!(waiter.join().unwrap(), Some(LinuxError::EINTR));
        assert_eq!(lock.holder(), Some(1));
    }
}
