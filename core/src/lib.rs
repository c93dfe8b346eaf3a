//! Process lifecycle services of the kernel: creation, fork, signal-driven
//! termination, crash handling and the finalizer.
//!
//! Everything outside the lifecycle itself (memory, filesystem, loader,
//! scheduler) is reached through the traits in [`interface`].
#![cfg_attr(not(any(test, feature = "testing")), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod config;
mod coredump;
mod entry;
mod finalizer;
mod fork;
pub mod interface;
mod kernel;
mod termination;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::KernelConfig;
pub use coredump::coredump_path;
pub use entry::KernelEntry;
pub use kernel::Kernel;
pub use termination::DefaultSignalAction;
