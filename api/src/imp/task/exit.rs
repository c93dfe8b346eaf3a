use kestrel_core::Kernel;

/// Ends the calling thread, or with `exit_group` the whole process.
///
/// `exit_group` records the status at once. A plain `exit` leaves it on the
/// thread, and it becomes the process's status if this turns out to be the
/// last thread to go.
pub fn sys_exit_impl(kernel: &Kernel, exit_code: i32, exit_group: bool) -> ! {
    {
        let status = (exit_code & 0xff) as u8;
        if let Ok(thread) = kernel.current_thread() {
            if let Some(process) = thread.get_process() {
                if exit_group {
                    info!("[exit] process {} exiting with code {}", process, status);
                    process.set_termination_status(status);
                    process.set_termination_signal(None);
                    kernel.die(&process);
                } else {
                    info!(
                        "[exit] thread {} exiting with code {}",
                        thread.get_tid(),
                        status
                    );
                    thread.set_exit_status(status);
                }
            }
        }
    }
    kernel.exit_current_thread()
}
