//! Per-process file descriptor table (`spec.md` §4.5).
//!
//! Slots 0 and 1 are reserved for the console and never consult the
//! table: [`FdTable::get_file`] refuses to return a handle for them,
//! and callers are expected to special-case `fd < 2` as a console
//! pass-through before reaching this table, exactly as `spec.md` §4.5
//! describes.

use super::dirent::ReadDirCursor;
use super::InodeHandle;
use crate::error::{KernelError, Result};
use crate::param::NOFILE;

/// First descriptor this table will ever hand out; 0 and 1 are
/// reserved for stdin/stdout.
const FIRST_FD: usize = 2;

/// An open file: an inode handle, a byte offset, a deny-write flag
/// mirrored from the inode (closing this handle calls `allow_write` if
/// it was set), and — for directories — a readdir cursor.
pub struct FileHandle {
    pub inode: InodeHandle,
    pub offset: u32,
    pub deny_write: bool,
    pub dir_cursor: ReadDirCursor,
}

impl FileHandle {
    pub fn new(inode: InodeHandle) -> Self {
        Self {
            inode,
            offset: 0,
            deny_write: false,
            dir_cursor: ReadDirCursor::default(),
        }
    }
}

/// Fixed-size descriptor table. `get_fd` linearly finds the first empty
/// slot at or after [`FIRST_FD`]; `get_file`/`remove_fd` bounds-check.
#[derive(Default)]
pub struct FdTable {
    slots: Vec<Option<FileHandle>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(NOFILE);
        slots.resize_with(NOFILE, || None);
        Self { slots }
    }

    /// Installs `file` in the first free slot at or after descriptor 2
    /// and returns its descriptor. Fails if the table is full.
    pub fn get_fd(&mut self, file: FileHandle) -> Result<usize> {
        for fd in FIRST_FD..self.slots.len() {
            if self.slots[fd].is_none() {
                self.slots[fd] = Some(file);
                return Ok(fd);
            }
        }
        Err(KernelError::Exhausted { resource: "file descriptors" })
    }

    /// Returns a reference to the file at `fd`, or `None` for an
    /// out-of-range or reserved descriptor.
    pub fn get_file(&self, fd: usize) -> Option<&FileHandle> {
        if fd < FIRST_FD {
            return None;
        }
        self.slots.get(fd).and_then(|s| s.as_ref())
    }

    /// Mutable counterpart of [`FdTable::get_file`].
    pub fn get_file_mut(&mut self, fd: usize) -> Option<&mut FileHandle> {
        if fd < FIRST_FD {
            return None;
        }
        self.slots.get_mut(fd).and_then(|s| s.as_mut())
    }

    /// Clears `fd`'s slot and returns the handle that was there, if
    /// any, so the caller can run its close teardown.
    pub fn remove_fd(&mut self, fd: usize) -> Option<FileHandle> {
        if fd < FIRST_FD {
            return None;
        }
        self.slots.get_mut(fd).and_then(|s| s.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle(sector: u32) -> InodeHandle {
        InodeHandle { sector }
    }

    #[test]
    fn reserves_fds_0_and_1() {
        let mut table = FdTable::new();
        let fd = table.get_fd(FileHandle::new(dummy_handle(10))).unwrap();
        assert!(fd >= 2);
    }

    #[test]
    fn remove_then_reuse_slot() {
        let mut table = FdTable::new();
        let fd = table.get_fd(FileHandle::new(dummy_handle(10))).unwrap();
        assert!(table.remove_fd(fd).is_some());
        assert!(table.get_file(fd).is_none());
        let fd2 = table.get_fd(FileHandle::new(dummy_handle(11))).unwrap();
        assert_eq!(fd, fd2);
    }

    #[test]
    fn fd_0_and_1_never_returned() {
        assert!(FdTable::new().get_file(0).is_none());
        assert!(FdTable::new().get_file(1).is_none());
    }
}
