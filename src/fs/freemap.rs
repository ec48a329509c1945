//! Free-sector allocator (`spec.md` §4.2).
//!
//! The bitmap itself lives in the free-map inode's data sectors, read
//! and written through the very buffer cache it governs allocation for
//! — the same bootstrapping the reference source uses: the free-map
//! inode's own sector and the root directory's own sector are marked
//! allocated by construction at format time, before the bitmap is ever
//! consulted for anything else.

use std::sync::Mutex;

use crate::bio::BufferCache;
use crate::bitmap::SectorBitmap;
use crate::param::{BOOT_SECTOR, FREE_MAP_SECTOR, RESERVED_SECTORS, ROOT_DIR_SECTOR, SECTOR_SIZE};

/// Process-wide singleton bitmap over the filesystem device's sectors.
pub struct FreeMap {
    bits: Mutex<SectorBitmap>,
}

impl FreeMap {
    /// Formats a fresh bitmap for a device of `total_sectors`, marking
    /// the boot sector, the free-map's own sector, and the root
    /// directory's sector allocated, then persists it to
    /// `FREE_MAP_SECTOR`'s data region.
    pub fn format(cache: &BufferCache, total_sectors: u32) -> Self {
        let mut bits = SectorBitmap::new(total_sectors as usize);
        bits.mark(BOOT_SECTOR as usize, 1);
        bits.mark(FREE_MAP_SECTOR as usize, 1);
        bits.mark(ROOT_DIR_SECTOR as usize, 1);
        let bitmap_sectors = bits.len().div_ceil(8).div_ceil(SECTOR_SIZE);
        bits.mark(RESERVED_SECTORS as usize, bitmap_sectors);
        let map = Self { bits: Mutex::new(bits) };
        map.persist(cache);
        map
    }

    /// Reopens a bitmap previously persisted by [`FreeMap::persist`].
    pub fn open(cache: &BufferCache) -> Self {
        let sector_count = Self::read_sector_count(cache);
        let byte_len = sector_count.div_ceil(8);
        let mut bytes = vec![0u8; byte_len];
        let mut done = 0;
        while done < byte_len {
            let chunk = SECTOR_SIZE.min(byte_len - done);
            cache.read_through(RESERVED_SECTORS + (done / SECTOR_SIZE) as u32, 0, &mut bytes[done..done + chunk]);
            done += chunk;
        }
        Self {
            bits: Mutex::new(SectorBitmap::from_bytes(&bytes, sector_count)),
        }
    }

    fn read_sector_count(cache: &BufferCache) -> usize {
        let mut bytes = [0u8; 4];
        cache.read_through(FREE_MAP_SECTOR, 0, &mut bytes);
        u32::from_ne_bytes(bytes).max(1) as usize
    }

    fn persist(&self, cache: &BufferCache) {
        let bits = self.bits.lock().unwrap();
        cache.write_through(FREE_MAP_SECTOR, 0, &(bits.len() as u32).to_ne_bytes());
        let bytes = bits.as_bytes();
        let mut done = 0;
        while done < bytes.len() {
            let chunk = SECTOR_SIZE.min(bytes.len() - done);
            cache.write_through(
                RESERVED_SECTORS + (done / SECTOR_SIZE) as u32,
                0,
                &bytes[done..done + chunk],
            );
            done += chunk;
        }
    }

    /// Scans for the first run of `n` free sectors, marks them
    /// allocated, and returns the starting sector. `None` on exhaustion.
    pub fn allocate(&self, cache: &BufferCache, n: usize) -> Option<u32> {
        let mut bits = self.bits.lock().unwrap();
        let start = match bits.allocate(n) {
            Some(start) => start,
            None => {
                log::warn!("free map exhausted: no run of {n} free sector(s)");
                return None;
            }
        };
        drop(bits);
        self.persist(cache);
        Some(start as u32)
    }

    /// Clears `n` bits starting at `start`.
    pub fn release(&self, cache: &BufferCache, start: u32, n: usize) {
        {
            let mut bits = self.bits.lock().unwrap();
            bits.release(start as usize, n);
        }
        self.persist(cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mem::MemDevice;
    use crate::device::Role;
    use crate::param::NBUF;
    use std::sync::Arc;

    fn fresh_cache(sectors: u32) -> BufferCache {
        let dev = Arc::new(MemDevice::new("t", Role::Filesys, sectors));
        BufferCache::new(dev, NBUF)
    }

    #[test]
    fn format_reserves_boot_freemap_and_root() {
        let cache = fresh_cache(512);
        let map = FreeMap::format(&cache, 512);
        // first free allocation must skip sectors 0..=2
        let sector = map.allocate(&cache, 1).unwrap();
        assert!(sector >= RESERVED_SECTORS);
    }

    #[test]
    fn reopen_preserves_allocations() {
        let cache = fresh_cache(512);
        let map = FreeMap::format(&cache, 512);
        let a = map.allocate(&cache, 4).unwrap();
        drop(map);
        let reopened = FreeMap::open(&cache);
        let b = reopened.allocate(&cache, 1).unwrap();
        assert!(b < a || b >= a + 4);
    }
}
