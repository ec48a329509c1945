//! Virtual memory areas (`spec.md` §3 "VMA", §4.6).

use bitflags::bitflags;

use crate::error::{KernelError, Result};
use crate::fs::InodeHandle;

bitflags! {
    /// Permission flags carried by a VMA; mirrored onto the simulated
    /// page-table entry when a page within it is installed.
    ///
    /// `bitflags!` (1.x) already derives `Copy`/`Clone`/`Eq`/`PartialEq`
    /// and hand-implements `Debug` for the generated struct.
    pub struct Perm: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// The file a VMA is backed by, and where in it the VMA's `start`
/// corresponds to.
#[derive(Debug, Clone, Copy)]
pub struct Backing {
    pub inode: InodeHandle,
    pub file_offset: u32,
    /// Set for the VMA mapping a process's own executable image: such
    /// pages are never written through to the file on eviction
    /// (`spec.md` §4.7).
    pub is_executable_image: bool,
}

/// A contiguous, page-aligned region of a process's address space
/// (`spec.md` §3 "VMA").
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub perm: Perm,
    pub backing: Option<Backing>,
}

impl Vma {
    pub fn contains(&self, page: u64) -> bool {
        page >= self.start && page < self.end
    }

    /// The backing file offset for page-aligned address `page` within
    /// this VMA (`spec.md` §4.6 step 4: `(u - vma.start) + vma.offset`).
    pub fn file_offset_for(&self, page: u64) -> Option<u32> {
        self.backing
            .map(|b| b.file_offset + (page - self.start) as u32)
    }
}

/// A process's list of VMAs. Lookup is linear, matching `spec.md`
/// §4.6's explicit "VMA lookup is linear" — the set is small enough
/// that an index structure would only add complexity.
#[derive(Debug, Default)]
pub struct VmaList {
    vmas: Vec<Vma>,
}

impl VmaList {
    pub fn find(&self, page: u64) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.contains(page))
    }

    pub fn find_by_start(&self, start: u64) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.start == start)
    }

    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.vmas.iter().any(|v| start < v.end && v.start < end)
    }

    /// Inserts `vma`, rejecting it if it overlaps an existing VMA
    /// (`spec.md` §3 "VMAs in one process do not overlap").
    pub fn insert(&mut self, vma: Vma) -> Result<()> {
        if self.overlaps(vma.start, vma.end) {
            return Err(KernelError::InvalidArgument("VMA overlaps an existing mapping"));
        }
        self.vmas.push(vma);
        Ok(())
    }

    /// Removes and returns the VMA starting exactly at `start`.
    pub fn remove_starting_at(&mut self, start: u64) -> Option<Vma> {
        let pos = self.vmas.iter().position(|v| v.start == start)?;
        Some(self.vmas.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter()
    }
}
