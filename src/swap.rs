//! Swap subsystem (`spec.md` §4.7).
//!
//! Backing store for dirty evicted writable pages. Bypasses the buffer
//! cache entirely (`SPEC_FULL.md` §4.1 (added)): an evicted page is a
//! one-shot 8-sector transfer the cache would not help with, and
//! caching it would let swap sectors alias buffer-cache groups with no
//! eviction coordination between the two paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bitmap::SectorBitmap;
use crate::device::BlockDevice;
use crate::error::{KernelError, Result};
use crate::param::{PAGE_SIZE, SECTORS_PER_PAGE};
use crate::process::Process;

/// The system-wide swap device and its sector bitmap. Sector 0 is
/// reserved and never handed out (`spec.md` §3 "Swap slot").
pub struct SwapSpace {
    device: Arc<dyn BlockDevice>,
    bitmap: Mutex<SectorBitmap>,
}

impl SwapSpace {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let mut bits = SectorBitmap::new(device.sector_count() as usize);
        bits.mark(0, 1);
        Self {
            device,
            bitmap: Mutex::new(bits),
        }
    }

    /// Allocates a fresh 8-sector slot and writes `page` into it.
    pub fn write(&self, page: &[u8; PAGE_SIZE]) -> Result<u32> {
        let start = {
            let mut bits = self.bitmap.lock().unwrap();
            bits.allocate(SECTORS_PER_PAGE).ok_or_else(|| {
                log::warn!("swap space exhausted: no free {SECTORS_PER_PAGE}-sector slot");
                KernelError::Exhausted { resource: "swap slots" }
            })?
        };
        self.device.write_sectors(start as u32, page);
        Ok(start as u32)
    }

    /// Overwrites an already-allocated slot in place.
    pub fn overwrite(&self, sector: u32, page: &[u8; PAGE_SIZE]) {
        self.device.write_sectors(sector, page);
    }

    /// Reads a slot's contents. Does not free the slot — re-use is only
    /// on the next re-eviction overwriting it in place (`spec.md` §9's
    /// resolved "suspicious or ambiguous source behaviour" note).
    pub fn read(&self, sector: u32, page: &mut [u8; PAGE_SIZE]) {
        self.device.read_sectors(sector, page);
    }

    /// Frees an 8-sector slot. Only called from process-exit teardown.
    pub fn free(&self, sector: u32) {
        self.bitmap.lock().unwrap().release(sector as usize, SECTORS_PER_PAGE);
    }
}

/// Per-process map from virtual page to its current swap slot
/// (`spec.md` §3 "Swap slot").
#[derive(Debug, Default)]
pub struct SwapTable {
    slots: HashMap<u64, u32>,
}

impl SwapTable {
    pub fn lookup(&self, vpage: u64) -> Option<u32> {
        self.slots.get(&vpage).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Evicts a writable page's contents: writes through to its backing
/// file first (unless it is the executable image itself), then writes
/// or overwrites its swap slot (`spec.md` §4.7 "On eviction").
pub fn evict_writable_page(
    swap: &SwapSpace,
    fs: &crate::fs::Fs,
    process: &mut Process,
    vpage: u64,
    page: &[u8; PAGE_SIZE],
) -> Result<()> {
    if let Some(vma) = process.vmas.find(vpage).copied() {
        if let Some(backing) = vma.backing {
            if !backing.is_executable_image {
                let offset = vma.file_offset_for(vpage).expect("file-backed VMA has an offset");
                fs.write_at(backing.inode, page, offset)?;
            }
        }
    }

    match process.swap_table.slots.get(&vpage) {
        Some(&sector) => swap.overwrite(sector, page),
        None => {
            let sector = swap.write(page)?;
            process.swap_table.slots.insert(vpage, sector);
        }
    }
    Ok(())
}

/// Reads `vpage`'s swap slot into `page` if one exists, without
/// clearing it (`spec.md` §4.7 "On fault for u").
pub fn read_if_present(swap: &SwapSpace, process: &Process, vpage: u64, page: &mut [u8; PAGE_SIZE]) -> bool {
    match process.swap_table.lookup(vpage) {
        Some(sector) => {
            swap.read(sector, page);
            true
        }
        None => false,
    }
}

/// Frees every swap slot a process holds, run from the process-exit
/// teardown path (`spec.md` §4.7 "On process exit").
pub fn free_all(swap: &SwapSpace, process: &mut Process) {
    for (_, sector) in process.swap_table.slots.drain() {
        swap.free(sector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::device::Role;

    #[test]
    fn sector_zero_is_reserved() {
        let space = SwapSpace::new(Arc::new(MemDevice::new("swap", Role::Swap, 64)));
        let sector = space.write(&[0u8; PAGE_SIZE]).unwrap();
        assert_ne!(sector, 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let space = SwapSpace::new(Arc::new(MemDevice::new("swap", Role::Swap, 64)));
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0x42;
        let sector = space.write(&page).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        space.read(sector, &mut out);
        assert_eq!(out[0], 0x42);
    }

    #[test]
    fn free_allows_reallocation() {
        let space = SwapSpace::new(Arc::new(MemDevice::new("swap", Role::Swap, 2 * SECTORS_PER_PAGE as u32)));
        let sector = space.write(&[0u8; PAGE_SIZE]).unwrap();
        space.free(sector);
        let sector2 = space.write(&[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(sector, sector2);
    }
}
