//! Platform constants and the runtime knobs of the lifecycle core.

use alloc::string::String;

/// Number of descriptor slots every user process gets.
pub const MAX_OPEN_FILE_DESCRIPTORS: usize = 128;

pub const THREAD_PRIORITY_MIN: u32 = 1;
pub const THREAD_PRIORITY_MAX: u32 = 99;
pub const THREAD_PRIORITY_NORMAL: u32 = 30;

/// Directory core dumps are written to.
pub const COREDUMP_DIRECTORY: &str = "/tmp/coredump";

/// Mode of `perfcore.<pid>` files.
pub const PERFCORE_MODE: u32 = 0o400;

/// Affinity mask allowing every CPU.
pub const AFFINITY_ANY: u32 = u32::MAX;

/// Id of the idle process. It is never registered in the process table.
pub const IDLE_PID: u32 = 0;

const _: () = assert!(THREAD_PRIORITY_MIN <= THREAD_PRIORITY_NORMAL);
const _: () = assert!(THREAD_PRIORITY_NORMAL <= THREAD_PRIORITY_MAX);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_open_file_descriptors: usize,
    pub coredump_directory: String,
    pub thread_priority_min: u32,
    pub thread_priority_max: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_open_file_descriptors: MAX_OPEN_FILE_DESCRIPTORS,
            coredump_directory: COREDUMP_DIRECTORY.into(),
            thread_priority_min: THREAD_PRIORITY_MIN,
            thread_priority_max: THREAD_PRIORITY_MAX,
        }
    }
}

impl KernelConfig {
    pub fn with_max_open_file_descriptors(mut self, count: usize) -> Self {
        self.max_open_file_descriptors = count;
        self
    }

    pub fn with_coredump_directory(mut self, directory: impl Into<String>) -> Self {
        self.coredump_directory = directory.into();
        self
    }

    pub fn with_thread_priority_range(mut self, min: u32, max: u32) -> Self {
        self.thread_priority_min = min;
        self.thread_priority_max = max;
        self
    }

    pub fn priority_is_valid(&self, priority: u32) -> bool {
        (self.thread_priority_min..=self.thread_priority_max).contains(&priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_range_is_inclusive() {
        let config = KernelConfig::default();
        assert!(config.priority_is_valid(THREAD_PRIORITY_MIN));
        assert!(config.priority_is_valid(THREAD_PRIORITY_MAX));
        assert!(!config.priority_is_valid(0));
        assert!(!config.priority_is_valid(THREAD_PRIORITY_MAX + 1));
        let narrow = config.with_thread_priority_range(10, 20);
        assert!(!narrow.priority_is_valid(THREAD_PRIORITY_NORMAL));
    }
}
