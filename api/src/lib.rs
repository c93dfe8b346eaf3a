//! Syscall-facing operations of the process lifecycle core.
//!
//! Every syscall takes the [`kestrel_core::Kernel`] it runs against and acts
//! on behalf of the scheduler's current thread.
#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod imp;
pub mod interface;
