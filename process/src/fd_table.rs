//! Per-process file descriptor table.
//!
//! The table has a fixed number of slots chosen when the process is created;
//! a descriptor number is the index of its slot.

use crate::handle::FileDescriptionRef;
use alloc::vec::Vec;
use axerrno::{LinuxError, LinuxResult};
use bitflags::bitflags;
use linux_raw_sys::general::FD_CLOEXEC;

bitflags! {
    /// Flags attached to a descriptor (not to the file description).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FdFlags: u32 {
        /// Close the descriptor on a successful execve.
        const CLOEXEC = FD_CLOEXEC;
    }
}

/// One descriptor slot.
#[derive(Clone, Default)]
pub struct FileDescriptionAndFlags {
    description: Option<FileDescriptionRef>,
    flags: FdFlags,
}

impl FileDescriptionAndFlags {
    pub fn is_open(&self) -> bool {
        self.description.is_some()
    }

    pub fn description(&self) -> Option<FileDescriptionRef> {
        self.description.clone()
    }

    pub fn flags(&self) -> FdFlags {
        self.flags
    }

    pub fn set(&mut self, description: FileDescriptionRef, flags: FdFlags) {
        self.description = Some(description);
        self.flags = flags;
    }

    /// Empties the slot, returning the description it held.
    pub fn clear(&mut self) -> Option<FileDescriptionRef> {
        self.flags = FdFlags::empty();
        self.description.take()
    }
}

#[derive(Clone, Default)]
pub struct FdTable {
    slots: Vec<FileDescriptionAndFlags>,
}

impl FdTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| FileDescriptionAndFlags::default()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, fd: i32) -> Option<&FileDescriptionAndFlags> {
        usize::try_from(fd).ok().and_then(|index| self.slots.get(index))
    }

    fn slot_mut(&mut self, fd: i32) -> Option<&mut FileDescriptionAndFlags> {
        usize::try_from(fd)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
    }

    /// The description behind `fd`, or `None` if `fd` is out of range or unused.
    pub fn file_description(&self, fd: i32) -> Option<FileDescriptionRef> {
        self.slot(fd).and_then(FileDescriptionAndFlags::description)
    }

    pub fn fd_flags(&self, fd: i32) -> LinuxResult<FdFlags> {
        self.slot(fd)
            .map(FileDescriptionAndFlags::flags)
            .ok_or(LinuxError::EBADF)
    }

    pub fn set_fd_flags(&mut self, fd: i32, flags: FdFlags) -> LinuxResult<()> {
        let slot = self
            .slot_mut(fd)
            .filter(|slot| slot.is_open())
            .ok_or(LinuxError::EBADF)?;
        slot.flags = flags;
        Ok(())
    }

    /// The smallest unused descriptor number not below `first_candidate_fd`.
    pub fn alloc_fd(&self, first_candidate_fd: i32) -> LinuxResult<i32> {
        let first = usize::try_from(first_candidate_fd).map_err(|_| LinuxError::EINVAL)?;
        (first..self.slots.len())
            .find(|&index| !self.slots[index].is_open())
            .map(|index| index as i32)
            .ok_or(LinuxError::EMFILE)
    }

    pub fn set(&mut self, fd: i32, description: FileDescriptionRef, flags: FdFlags) -> LinuxResult<()> {
        self.slot_mut(fd)
            .ok_or(LinuxError::EBADF)?
            .set(description, flags);
        Ok(())
    }

    pub fn close(&mut self, fd: i32) -> LinuxResult<FileDescriptionRef> {
        self.slot_mut(fd)
            .and_then(FileDescriptionAndFlags::clear)
            .ok_or(LinuxError::EBADF)
    }

    pub fn number_of_open_file_descriptors(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_open()).count()
    }

    /// Drops every slot. The table has no capacity afterwards.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
