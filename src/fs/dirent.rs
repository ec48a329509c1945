//! Directory entries and directory operations (`spec.md` §4.4).
//!
//! A directory is an ordinary file whose content is a dense array of
//! fixed-size [`Dirent`] records, read and written through [`Fs`]'s own
//! `read_at`/`write_at` — directories are files, same as the reference.

use zerocopy::{AsBytes, FromBytes};

use super::{Fs, InodeHandle, InodeType};
use crate::error::{KernelError, Result};
use crate::param::{NAME_MAX, ROOT_DIR_SECTOR};

const NAME_FIELD: usize = NAME_MAX + 1;

/// One packed 20-byte directory entry (`spec.md` §6).
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct Dirent {
    pub inode_sector: u32,
    name: [u8; NAME_FIELD],
    in_use: u8,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Dirent>(), 20);

impl Dirent {
    fn empty() -> Self {
        Self {
            inode_sector: 0,
            name: [0; NAME_FIELD],
            in_use: 0,
        }
    }

    fn new(inode_sector: u32, name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(KernelError::InvalidArgument("directory entry name length"));
        }
        let mut field = [0u8; NAME_FIELD];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            inode_sector,
            name: field,
            in_use: 1,
        })
    }

    fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

const ENTRY_SIZE: u32 = 20;

fn entry_count(fs: &Fs, dir: InodeHandle) -> u32 {
    fs.length(dir) as u32 / ENTRY_SIZE
}

fn read_entry(fs: &Fs, dir: InodeHandle, slot: u32) -> Option<Dirent> {
    let mut bytes = [0u8; 20];
    let n = fs.read_at(dir, &mut bytes, slot * ENTRY_SIZE);
    if n < 20 {
        return None;
    }
    Some(Dirent::read_from(&bytes[..]).expect("20-byte buffer"))
}

fn write_entry(fs: &Fs, dir: InodeHandle, slot: u32, entry: &Dirent) {
    fs.write_at(dir, entry.as_bytes(), slot * ENTRY_SIZE)
        .expect("directory write should not be deny-write'd");
}

/// Scans `dir` sequentially for an in-use entry named `target`.
pub fn lookup(fs: &Fs, dir: InodeHandle, target: &str) -> Option<(u32, Dirent)> {
    let count = entry_count(fs, dir);
    for slot in 0..count {
        if let Some(entry) = read_entry(fs, dir, slot) {
            if entry.in_use() && entry.name() == target {
                return Some((slot, entry));
            }
        }
    }
    None
}

/// Adds `name -> inode_sector` to `dir`: the first `!in_use` slot is
/// reused, or the entry is appended at EOF. Fails if `name` is invalid
/// or already present.
pub fn add(fs: &Fs, dir: InodeHandle, name: &str, inode_sector: u32) -> Result<()> {
    if lookup(fs, dir, name).is_some() {
        return Err(KernelError::AlreadyExists);
    }
    let entry = Dirent::new(inode_sector, name)?;
    let count = entry_count(fs, dir);
    let mut target_slot = count;
    for slot in 0..count {
        if let Some(existing) = read_entry(fs, dir, slot) {
            if !existing.in_use() {
                target_slot = slot;
                break;
            }
        }
    }
    write_entry(fs, dir, target_slot, &entry);
    Ok(())
}

/// Removes the entry named `name` from `dir`.
///
/// If the entry's inode is itself a directory, it must contain no
/// `in_use` entries beyond "." and ".." (`spec.md` §4.4 "Remove").
/// Removing "." , ".." , or "/" always fails.
pub fn remove(fs: &Fs, dir: InodeHandle, name: &str) -> Result<()> {
    if name == "." || name == ".." || name == "/" {
        return Err(KernelError::PermissionDenied);
    }
    let (slot, entry) = lookup(fs, dir, name).ok_or(KernelError::NotFound)?;

    let target = fs.open(entry.inode_sector);
    if fs.inode_type(target) == InodeType::Dir {
        let target_count = entry_count(fs, target);
        let mut live = 0;
        for s in 0..target_count {
            if let Some(e) = read_entry(fs, target, s) {
                if e.in_use() && e.name() != "." && e.name() != ".." {
                    live += 1;
                }
            }
        }
        if live > 0 {
            fs.close(target);
            return Err(KernelError::DirectoryNotEmpty);
        }
    }

    write_entry(fs, dir, slot, &Dirent::empty());
    fs.mark_removed(target);
    fs.close(target);
    Ok(())
}

/// Directory read cursor state, held by the file-table layer alongside
/// a directory's [`InodeHandle`] (`spec.md` §4.4 "Readdir").
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadDirCursor {
    next_slot: u32,
}

impl ReadDirCursor {
    /// Advances past `!in_use` slots and returns the next live entry's
    /// name, or `None` at EOF.
    pub fn next(&mut self, fs: &Fs, dir: InodeHandle) -> Option<String> {
        let count = entry_count(fs, dir);
        while self.next_slot < count {
            let slot = self.next_slot;
            self.next_slot += 1;
            if let Some(entry) = read_entry(fs, dir, slot) {
                if entry.in_use() {
                    return Some(entry.name().to_owned());
                }
            }
        }
        None
    }
}

/// Allocates a sector, creates a directory inode there sized for an
/// empty directory, links `name -> new_sector` into `parent`, and
/// populates "." and ".." in the new directory (`spec.md` §4.4
/// "dir_create"). Rolls back the allocated sector on any failure
/// (`SPEC_FULL.md` §4.4 (added), via `scopeguard`).
pub fn dir_create(fs: &Fs, parent: InodeHandle, name: &str) -> Result<InodeHandle> {
    let sector = fs
        .free_map
        .allocate(&fs.cache, 1)
        .ok_or(KernelError::Exhausted { resource: "filesystem sectors" })?;
    let mut committed = false;
    let guard = scopeguard::guard((), |_| {
        if !committed {
            fs.free_map.release(&fs.cache, sector, 1);
        }
    });

    fs.create(sector, 2 * 20, InodeType::Dir)?;
    let new_dir = fs.open(sector);
    add(fs, new_dir, ".", sector)?;
    add(fs, new_dir, "..", parent.sector())?;
    add(fs, parent, name, sector)?;

    committed = true;
    drop(guard);
    Ok(new_dir)
}

/// Creates the root directory's on-disk inode and populates its "."
/// and ".." entries (both pointing at itself) at format time.
pub fn dir_create_root(fs: &Fs) {
    fs.create(ROOT_DIR_SECTOR, 2 * 20, InodeType::Dir)
        .expect("formatting a fresh device must not run out of sectors");
    let root = fs.open(ROOT_DIR_SECTOR);
    add(fs, root, ".", ROOT_DIR_SECTOR).expect("fresh root directory");
    add(fs, root, "..", ROOT_DIR_SECTOR).expect("fresh root directory");
    fs.close(root);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::BufferCache;
    use crate::device::mem::MemDevice;
    use crate::device::Role;
    use crate::param::NBUF;
    use std::sync::Arc;

    fn fresh_fs() -> Fs {
        let dev = Arc::new(MemDevice::new("t", Role::Filesys, 2048));
        let cache = BufferCache::new(dev, NBUF);
        Fs::format(cache, 2048)
    }

    #[test]
    fn root_has_dot_and_dotdot() {
        let fs = fresh_fs();
        let root = fs.root();
        assert_eq!(lookup(&fs, root, ".").unwrap().0, 0);
        assert_eq!(lookup(&fs, root, "..").unwrap().0, 1);
    }

    #[test]
    fn add_lookup_remove_round_trips() {
        let fs = fresh_fs();
        let root = fs.root();
        let file_sector = fs.free_map.allocate(&fs.cache, 1).unwrap();
        fs.create(file_sector, 0, InodeType::File).unwrap();
        add(&fs, root, "f", file_sector).unwrap();
        assert!(lookup(&fs, root, "f").is_some());
        remove(&fs, root, "f").unwrap();
        assert!(lookup(&fs, root, "f").is_none());
    }

    #[test]
    fn removing_dot_or_dotdot_fails() {
        let fs = fresh_fs();
        let root = fs.root();
        assert!(remove(&fs, root, ".").is_err());
        assert!(remove(&fs, root, "..").is_err());
    }

    #[test]
    fn removing_nonempty_directory_fails() {
        let fs = fresh_fs();
        let root = fs.root();
        let sub = dir_create(&fs, root, "d").unwrap();
        let inner_sector = fs.free_map.allocate(&fs.cache, 1).unwrap();
        fs.create(inner_sector, 0, InodeType::File).unwrap();
        add(&fs, sub, "f", inner_sector).unwrap();
        fs.close(sub);
        assert!(remove(&fs, root, "d").is_err());
    }
}
