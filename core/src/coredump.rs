use crate::config::PERFCORE_MODE;
use crate::kernel::Kernel;
use alloc::format;
use alloc::string::String;
use axerrno::{LinuxError, LinuxResult};
use kestrel_process::handle::FileDescription;
use kestrel_process::{Pid, Process};

/// `<directory>/<name>_<pid>_<timestamp>`
pub fn coredump_path(directory: &str, name: &str, pid: Pid, timestamp: u64) -> String {
    format!(
        "{}/{}_{}_{}",
        directory.trim_end_matches('/'),
        name,
        pid,
        timestamp
    )
}

fn write_all(description: &dyn FileDescription, mut data: &[u8]) -> LinuxResult<()> {
    while !data.is_empty() {
        match description.write(data)? {
            0 => return Err(LinuxError::EIO),
            written => data = &data[written..],
        }
    }
    Ok(())
}

impl Kernel {
    pub(crate) fn dump_core(&self, process: &Process) -> LinuxResult<()> {
        let path = coredump_path(
            &self.config().coredump_directory,
            &process.name(),
            process.get_pid(),
            self.collaborators().clock.now_secs(),
        );
        info!("[finalizer] writing core dump of {} to {}", process, path);
        self.collaborators().core_dumps.write(process, &path)
    }

    /// Writes the perf events of `process` to `perfcore.<pid>` in its working
    /// directory.
    pub(crate) fn dump_perfcore(&self, process: &Process) -> LinuxResult<()> {
        let executable_path = process
            .executable()
            .map(|executable| executable.absolute_path())
            .unwrap_or_default();
        let json = process
            .perf_events_json(&executable_path)
            .ok_or(LinuxError::ENOMEM)?;
        let path = format!("perfcore.{}", process.get_pid());
        let cwd = process.cwd();
        let description = self.collaborators().vfs.open_exclusive(
            &path,
            cwd.as_ref(),
            process.uid(),
            process.gid(),
            PERFCORE_MODE,
        )?;
        write_all(description.as_ref(), &json)?;
        info!("[finalizer] wrote {} for {}", path, process);
        Ok(())
    }
}
