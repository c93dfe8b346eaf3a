//! Handles to objects owned by other kernel subsystems.
//!
//! A process stores these and hands them back to their owners; it never looks
//! inside them.

use crate::Pid;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::LinuxResult;

/// An open file description, shared by every descriptor that refers to it.
pub trait FileDescription: Send + Sync {
    fn write(&self, data: &[u8]) -> LinuxResult<usize>;
}

pub type FileDescriptionRef = Arc<dyn FileDescription>;

/// A resolved location in the filesystem (current directory, root, executable).
pub trait Custody: Send + Sync {
    fn absolute_path(&self) -> String;
}

pub type CustodyRef = Arc<dyn Custody>;

/// A terminal device that can be a controlling terminal.
pub trait Tty: Send + Sync {
    fn tty_name(&self) -> String;

    /// Opens the device for reading and writing.
    fn open(&self) -> LinuxResult<FileDescriptionRef>;
}

pub type TtyRef = Arc<dyn Tty>;

/// The virtual memory address space of a process.
pub trait AddressSpace: Send + Sync {
    /// Duplicates the address space for a forked child.
    fn try_clone(&self) -> LinuxResult<AddressSpaceRef>;

    fn remove_all_regions(&self);

    /// Writes the region map to the kernel log.
    fn dump_regions(&self);
}

pub type AddressSpaceRef = Arc<dyn AddressSpace>;

/// Per-process log of performance events.
pub trait PerfEventBuffer: Send + Sync {
    /// Serializes the buffer; `None` if it cannot be represented.
    fn to_json(&self, pid: Pid, executable_path: &str) -> Option<Vec<u8>>;
}

/// Identifies an armed timer in the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);
