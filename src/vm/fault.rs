//! Demand-paging fault handler (`spec.md` §4.6 "Demand paging").

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::param::{PAGE_SIZE, STACK_GROWTH_SLACK};
use crate::process::Process;
use crate::swap;

use super::vma::{Perm, Vma};

fn page_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

fn page_up(addr: u64) -> u64 {
    page_down(addr + PAGE_SIZE as u64 - 1)
}

/// Handles a page fault at `fault_addr`. `Err` means the access is not
/// backed by any VMA and not a plausible stack growth: the caller
/// should terminate the process with exit status -1, per `spec.md`
/// §4.6 step 3 and §6 "kernel-detected fault."
pub fn handle_page_fault(
    kernel: &Kernel,
    process: &mut Process,
    fault_addr: u64,
    from_user: bool,
) -> Result<()> {
    let u = page_down(fault_addr);

    let vma = match process.vmas.find(u) {
        Some(vma) => *vma,
        None => grow_stack_or_fail(process, fault_addr, from_user)?,
    };

    let read_bytes = match vma.file_offset_for(u) {
        Some(_) => (vma.end - u).min(PAGE_SIZE as u64) as usize,
        None => 0,
    };

    let frame = process.acquire_frame(kernel, vma.perm.contains(Perm::WRITE))?;

    let mut buf = [0u8; PAGE_SIZE];
    if !swap::read_if_present(&kernel.swap, process, u, &mut buf) {
        let offset = vma.file_offset_for(u);
        if let (Some(backing), Some(offset)) = (vma.backing, offset) {
            let got = kernel.fs.read_at(backing.inode, &mut buf[..read_bytes], offset);
            buf[got..].fill(0);
        }
    }
    *process.frame_data_mut(frame) = buf;

    process.install_mapping(frame, u);
    Ok(())
}

/// Step 3: stack growth by exactly one page when the fault lands within
/// `STACK_GROWTH_SLACK` bytes below the current user stack pointer.
fn grow_stack_or_fail(process: &mut Process, fault_addr: u64, from_user: bool) -> Result<Vma> {
    let within_slack = from_user
        && fault_addr < process.stack_pointer
        && process.stack_pointer - fault_addr <= STACK_GROWTH_SLACK as u64;
    if !within_slack {
        return Err(KernelError::InvalidArgument("segmentation fault"));
    }
    let start = page_down(fault_addr);
    let vma = Vma {
        start,
        end: page_up(fault_addr),
        perm: Perm::READ | Perm::WRITE,
        backing: None,
    };
    process.vmas.insert(vma)?;
    Ok(vma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::device::Role;
    use crate::fs::Fs;
    use crate::bio::BufferCache;
    use crate::kernel::Kernel;
    use crate::param::NBUF;
    use std::sync::Arc;

    fn test_kernel() -> Kernel {
        let fs_dev = Arc::new(MemDevice::new("fs", Role::Filesys, 2048));
        let cache = BufferCache::new(fs_dev, NBUF);
        let fs = Fs::format(cache, 2048);
        let swap_dev = Arc::new(MemDevice::new("swap", Role::Swap, 256));
        Kernel::new(fs, swap_dev)
    }

    #[test]
    fn fault_within_stack_slack_grows_one_page() {
        let kernel = test_kernel();
        let root = kernel.fs.root();
        let mut process = Process::new(root, 0x8000_1000);
        handle_page_fault(&kernel, &mut process, 0x8000_0ff0, true).unwrap();
        assert!(process.vmas.find(0x8000_0000).is_some());
    }

    #[test]
    fn fault_far_from_stack_and_no_vma_is_segfault() {
        let kernel = test_kernel();
        let root = kernel.fs.root();
        let mut process = Process::new(root, 0x8000_1000);
        assert!(handle_page_fault(&kernel, &mut process, 0x1000, true).is_err());
    }
}
