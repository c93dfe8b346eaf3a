//! Process and thread lifecycle objects of the kernel.
//!
//! A [`Process`] owns its threads, its file descriptor table and the handles it
//! borrowed from other subsystems. Live processes are registered in a
//! [`ProcessTable`]; a dying process hands its terminal state to the parent
//! through the parent's [`WaitCondition`], where it is consumed exactly once.
#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod big_lock;
pub mod credentials;
pub mod fd_table;
pub mod handle;
pub mod process;
pub mod signal;
pub mod table;
pub mod thread;
pub mod wait;

/// Type alias for process ID and thread ID.
/// Linux uses `int` for these IDs, which is typically 32 bits.
pub type Pid = u32;

pub use credentials::{Credentials, Gid, Uid};
pub use fd_table::{FdFlags, FdTable, FileDescriptionAndFlags};
pub use process::{Process, ProcessBuilder, ThreadTracer};
pub use signal::Signo;
pub use table::ProcessTable;
pub use thread::{Thread, ThreadContext, ThreadState};
pub use wait::{ChildStateChange, SpinWaitQueue, WaitCondition, WaitInfo, WaitOptions, WaitQueue};
