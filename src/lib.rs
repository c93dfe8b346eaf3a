//! Boot wiring of the process lifecycle core.
//!
//! [`init`] builds the kernel context once; [`boot`] creates the idle
//! process, the finalizer kernel process and the first user process.
#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod syscall;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::LinuxResult;
use kestrel_core::config::AFFINITY_ANY;
use kestrel_core::interface::Collaborators;
use kestrel_core::{Kernel, KernelConfig};
use kestrel_process::Process;
use kestrel_process::handle::TtyRef;
use spin::Once;

static KERNEL: Once<Arc<Kernel>> = Once::new();

/// Creates the kernel context. Later calls return the first one.
pub fn init(config: KernelConfig, collaborators: Collaborators) -> &'static Arc<Kernel> {
    KERNEL.call_once(|| Arc::new(Kernel::new(config, collaborators)))
}

/// The kernel context, once [`init`] has run.
pub fn kernel() -> Option<&'static Arc<Kernel>> {
    KERNEL.get()
}

/// The processes [`boot`] starts.
pub struct BootProcesses {
    pub idle: Arc<Process>,
    pub finalizer: Arc<Process>,
    pub init: Arc<Process>,
}

extern "C" fn idle_entry(_: usize) {
    loop {
        core::hint::spin_loop();
    }
}

extern "C" fn finalizer_entry(data: usize) {
    // SAFETY: `boot` passes a pointer from `Arc::into_raw` whose reference is
    // never released, so the kernel outlives this thread.
    let kernel = unsafe { &*(data as *const Kernel) };
    kernel.finalizer_loop()
}

/// Starts the idle process, the finalizer and `init_path` as the first user
/// process (uid 0, no parent).
pub fn boot(
    kernel: &Arc<Kernel>,
    init_path: &str,
    arguments: Vec<String>,
    environment: Vec<String>,
    tty: Option<TtyRef>,
) -> LinuxResult<BootProcesses> {
    let (idle, _) = kernel.create_idle_process(idle_entry, AFFINITY_ANY);

    let data = Arc::into_raw(kernel.clone()) as usize;
    let finalizer = match kernel.create_kernel_process("finalizer", finalizer_entry, data, AFFINITY_ANY) {
        Ok((finalizer, _)) => finalizer,
        Err(error) => {
            // SAFETY: the pointer came from `Arc::into_raw` above and was not handed out.
            drop(unsafe { Arc::from_raw(data as *const Kernel) });
            return Err(error);
        }
    };

    let (init, _) = kernel.create_user_process(init_path, 0, 0, 0, arguments, environment, tty)?;
    info!(
        "[boot] idle {}, finalizer {}, init {}",
        idle, finalizer, init
    );
    Ok(BootProcesses {
        idle,
        finalizer,
        init,
    })
}
