//! Per-process state: open files, address space, and swap table.
//!
//! Not shared between threads (`spec.md` §5: "Per-process VMA lists and
//! frame pools are not shared"), so `Process` carries no lock of its
//! own — callers serialize access to a given process the way the rest
//! of the kernel (out of scope here) schedules it.

use std::collections::HashMap;

use crate::error::Result;
use crate::fs::file::FdTable;
use crate::fs::InodeHandle;
use crate::kernel::Kernel;
use crate::param::{NOFILE, NUM_FRAMES_R, NUM_FRAMES_W, PAGE_SIZE};
use crate::swap::{self, SwapTable};
use crate::vm::frame::{FramePool, FrameRef, PoolKind};
use crate::vm::vma::VmaList;

/// A process's complete address-space and file-table state.
pub struct Process {
    pub cwd: InodeHandle,
    pub fds: FdTable,
    pub vmas: VmaList,
    pub writable_frames: FramePool,
    pub read_only_frames: FramePool,
    page_table: HashMap<u64, FrameRef>,
    pub(crate) swap_table: SwapTable,
    /// Current user stack pointer, consulted by the stack-growth
    /// heuristic (`spec.md` §4.6 step 3).
    pub stack_pointer: u64,
}

impl Process {
    pub fn new(cwd: InodeHandle, stack_pointer: u64) -> Self {
        Self {
            cwd,
            fds: FdTable::new(),
            vmas: VmaList::default(),
            writable_frames: FramePool::new(PoolKind::Writable, NUM_FRAMES_W),
            read_only_frames: FramePool::new(PoolKind::ReadOnly, NUM_FRAMES_R),
            page_table: HashMap::new(),
            swap_table: SwapTable::default(),
            stack_pointer,
        }
    }

    pub fn mapping(&self, vpage: u64) -> Option<FrameRef> {
        self.page_table.get(&vpage).copied()
    }

    pub fn unmap(&mut self, vpage: u64) -> Option<FrameRef> {
        self.page_table.remove(&vpage)
    }

    /// Removes `vpage`'s mapping and frees its frame slot for reuse by
    /// a future eviction sweep, without running the evictor itself.
    /// Used by `munmap` and process-exit teardown for individual pages.
    pub fn release_mapping(&mut self, vpage: u64) {
        if let Some(frame) = self.unmap(vpage) {
            self.pool_mut(frame.kind).vacate(frame.index);
        }
    }

    fn pool(&self, kind: PoolKind) -> &FramePool {
        match kind {
            PoolKind::Writable => &self.writable_frames,
            PoolKind::ReadOnly => &self.read_only_frames,
        }
    }

    fn pool_mut(&mut self, kind: PoolKind) -> &mut FramePool {
        match kind {
            PoolKind::Writable => &mut self.writable_frames,
            PoolKind::ReadOnly => &mut self.read_only_frames,
        }
    }

    /// Obtains a frame for a page about to be faulted in, evicting and
    /// saving a victim from the appropriate pool if necessary
    /// (`spec.md` §4.6 "Frame acquisition" / "Victim save").
    pub fn acquire_frame(&mut self, kernel: &Kernel, writable: bool) -> Result<FrameRef> {
        let kind = if writable { PoolKind::Writable } else { PoolKind::ReadOnly };
        let (index, evicted) = self.pool_mut(kind).acquire();
        if let Some(victim_vpage) = evicted {
            log::trace!("evicting page {victim_vpage:#x} from the {kind:?} pool");
            if kind == PoolKind::Writable {
                let data = *self.writable_frames.data(index);
                swap::evict_writable_page(&kernel.swap, &kernel.fs, self, victim_vpage, &data)?;
            }
            self.page_table.remove(&victim_vpage);
        }
        Ok(FrameRef { kind, index })
    }

    pub fn frame_data(&self, frame: FrameRef) -> &[u8; PAGE_SIZE] {
        self.pool(frame.kind).data(frame.index)
    }

    pub fn frame_data_mut(&mut self, frame: FrameRef) -> &mut [u8; PAGE_SIZE] {
        self.pool_mut(frame.kind).data_mut(frame.index)
    }

    pub fn frame_is_dirty(&self, frame: FrameRef) -> bool {
        self.pool(frame.kind).is_dirty(frame.index)
    }

    /// Installs `frame` as the mapping for `vpage`.
    pub fn install_mapping(&mut self, frame: FrameRef, vpage: u64) {
        self.pool_mut(frame.kind).install(frame.index, vpage);
        self.page_table.insert(vpage, frame);
    }

    /// Simulates a read access through the page table, setting the
    /// frame's `accessed` bit (`SPEC_FULL.md` §4.6 (added)).
    pub fn touch_read(&mut self, vpage: u64) {
        if let Some(frame) = self.mapping(vpage) {
            self.pool_mut(frame.kind).mark_accessed(frame.index);
        }
    }

    /// Simulates a write access, setting both `accessed` and `dirty`.
    pub fn touch_write(&mut self, vpage: u64) {
        if let Some(frame) = self.mapping(vpage) {
            self.pool_mut(frame.kind).mark_dirty(frame.index);
        }
    }

    /// Tears down this process's address space and file table in the
    /// fixed order `spec.md` §5 specifies: flush writable file-backed
    /// pages, release frames, release swap, close open files.
    pub fn exit(&mut self, kernel: &Kernel) {
        let mapped: Vec<(u64, FrameRef)> = self
            .vmas
            .iter()
            .filter(|v| v.backing.is_some())
            .flat_map(|v| {
                let mut pages = Vec::new();
                let mut p = v.start;
                while p < v.end {
                    if let Some(frame) = self.mapping(p) {
                        pages.push((p, frame));
                    }
                    p += PAGE_SIZE as u64;
                }
                pages
            })
            .collect();
        for (vpage, frame) in mapped {
            if frame.kind == PoolKind::Writable && self.writable_frames.is_dirty(frame.index) {
                if let Some(vma) = self.vmas.find(vpage).copied() {
                    if let Some(backing) = vma.backing {
                        if !backing.is_executable_image {
                            if let Some(offset) = vma.file_offset_for(vpage) {
                                let data = *self.writable_frames.data(frame.index);
                                let _ = kernel.fs.write_at(backing.inode, &data, offset);
                            }
                        }
                    }
                }
            }
        }

        self.writable_frames = FramePool::new(PoolKind::Writable, NUM_FRAMES_W);
        self.read_only_frames = FramePool::new(PoolKind::ReadOnly, NUM_FRAMES_R);
        self.page_table.clear();

        swap::free_all(&kernel.swap, self);

        for fd in 0..NOFILE {
            if let Some(file) = self.fds.remove_fd(fd) {
                if file.deny_write {
                    kernel.fs.allow_write(file.inode);
                }
                kernel.fs.close(file.inode);
            }
        }
    }
}
