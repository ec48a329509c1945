//! `mmap`/`munmap` (`spec.md` §4.8).

use crate::error::{KernelError, Result};
use crate::fs::Fs;
use crate::kernel::Kernel;
use crate::param::{PAGE_SIZE, STACK_MAX_SIZE};
use crate::process::Process;

use super::vma::{Backing, Perm, Vma};

/// An `mmap` id is the page-aligned address the mapping starts at; the
/// caller looks it up again by that address to `munmap` it.
pub type MmapId = u64;

fn in_stack_region(process: &Process, start: u64, end: u64) -> bool {
    let stack_floor = process.stack_pointer.saturating_sub(STACK_MAX_SIZE);
    start < process.stack_pointer && end > stack_floor
}

/// Creates a file-backed VMA for the file open at `fd`, covering
/// `[addr, addr + file_length)`. Fails (rather than panicking) on any
/// of `spec.md` §4.8's validation conditions: misalignment, a null
/// address, landing in the stack region, or overlapping an existing
/// mapping.
pub fn mmap(kernel: &Kernel, process: &mut Process, fd: usize, addr: u64) -> Result<MmapId> {
    if addr == 0 || addr as usize % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument("mmap: address not page-aligned"));
    }
    let file = process
        .fds
        .get_file(fd)
        .ok_or(KernelError::InvalidArgument("mmap: bad file descriptor"))?;
    let deny_write = file.deny_write;

    // The VMA keeps its own independent inode reference, open for the
    // VMA's own lifetime (`spec.md` §3/§4.8), distinct from the fd's:
    // `munmap` closes this one without disturbing the fd's handle.
    let inode = kernel.fs.open(file.inode.sector());

    let length = kernel.fs.length(inode) as u64;
    if length == 0 {
        kernel.fs.close(inode);
        return Err(KernelError::InvalidArgument("mmap: zero-length file"));
    }
    let end = addr + length.div_ceil(PAGE_SIZE as u64) * PAGE_SIZE as u64;

    if in_stack_region(process, addr, end) {
        kernel.fs.close(inode);
        return Err(KernelError::InvalidArgument("mmap: overlaps the stack region"));
    }

    let perm = if deny_write {
        Perm::READ | Perm::EXEC
    } else {
        Perm::READ | Perm::WRITE
    };
    let vma = Vma {
        start: addr,
        end,
        perm,
        backing: Some(Backing {
            inode,
            file_offset: 0,
            is_executable_image: false,
        }),
    };
    if let Err(e) = process.vmas.insert(vma) {
        kernel.fs.close(inode);
        return Err(e);
    }
    Ok(addr)
}

/// Flushes dirty pages of the VMA starting at `id` back to its file,
/// drops its frames from both pools, closes its file handle, and
/// removes the VMA (`spec.md` §4.8 "munmap"). TLB invalidation has no
/// counterpart here since this core simulates the page table directly
/// rather than through real hardware.
pub fn munmap(fs: &Fs, process: &mut Process, id: MmapId) -> Result<()> {
    let vma = process
        .vmas
        .find_by_start(id)
        .copied()
        .ok_or(KernelError::InvalidArgument("munmap: no mapping at that address"))?;
    let Some(backing) = vma.backing else {
        return Err(KernelError::InvalidArgument("munmap: not a file-backed mapping"));
    };

    let mut page = vma.start;
    while page < vma.end {
        if let Some(frame) = process.mapping(page) {
            if process.frame_is_dirty(frame) {
                if let Some(offset) = vma.file_offset_for(page) {
                    let data = *process.frame_data(frame);
                    let _ = fs.write_at(backing.inode, &data, offset);
                }
            }
        }
        process.release_mapping(page);
        page += PAGE_SIZE as u64;
    }

    process.vmas.remove_starting_at(id);
    fs.close(backing.inode);
    Ok(())
}
