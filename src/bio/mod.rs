//! Sector-oriented buffer cache (`spec.md` §4.1).
//!
//! A fixed pool of `NBUF` cached groups, each `GROUP_SECTORS` sectors
//! wide, lives on one most-recently-used-first list. A cache-wide mutex
//! protects the list and the (start sector → slot) index; each group
//! additionally carries its own mutex, held by whoever is holding a
//! [`Buf`] reference to it. The cache-wide mutex is always acquired
//! before a group's own mutex and is never held across a block-device
//! I/O — eviction looks up and reserves a victim slot under the list
//! lock, then releases it before doing the write-back and read-in.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::BlockDevice;
use crate::fatal;
use crate::param::{GROUP_SECTORS, GROUP_SIZE, SECTOR_SIZE};

struct GroupInner {
    valid: bool,
    dirty: bool,
    data: Vec<u8>,
}

impl GroupInner {
    fn empty() -> Self {
        Self {
            valid: false,
            dirty: false,
            data: vec![0u8; GROUP_SIZE],
        }
    }
}

struct GroupSlot {
    mutex: Mutex<GroupInner>,
}

/// Bookkeeping protected by the cache-wide lock: which group (if any)
/// each slot holds, the MRU-first order, and per-slot reference counts.
struct CacheList {
    /// Slot indices, front = most-recently-used.
    order: VecDeque<usize>,
    /// Group-aligned starting sector each slot currently holds.
    starts: Vec<Option<u32>>,
    /// Reference count per slot.
    refcount: Vec<usize>,
    /// start sector -> slot index, for occupied slots.
    index: HashMap<u32, usize>,
}

/// The buffer cache for a single block device.
pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    slots: Vec<GroupSlot>,
    list: Mutex<CacheList>,
}

/// A held reference to a cached group. Dropping it releases the
/// per-group mutex, decrements the reference count, and (if the count
/// reached zero) splices the group to the MRU end of the list — the
/// safe-Rust RAII equivalent of `spec.md` §4.1's explicit `release`.
pub struct Buf<'a> {
    cache: &'a BufferCache,
    slot: usize,
    guard: Option<MutexGuard<'a, GroupInner>>,
}

fn group_start(sector: u32) -> u32 {
    sector - sector % GROUP_SECTORS as u32
}

fn offset_in_group(sector: u32, start: u32) -> usize {
    (sector - start) as usize * SECTOR_SIZE
}

impl BufferCache {
    /// Creates a cache of `pool_size` groups over `device`.
    pub fn new(device: Arc<dyn BlockDevice>, pool_size: usize) -> Self {
        let slots = (0..pool_size)
            .map(|_| GroupSlot {
                mutex: Mutex::new(GroupInner::empty()),
            })
            .collect();
        let list = CacheList {
            order: (0..pool_size).collect(),
            starts: vec![None; pool_size],
            refcount: vec![0; pool_size],
            index: HashMap::new(),
        };
        Self {
            device,
            slots,
            list: Mutex::new(list),
        }
    }

    /// Returns a reference to the cached group containing `sector`,
    /// reading it from the device first if it was not already cached.
    ///
    /// # Panics
    /// If `sector` is out of the device's range, or if every slot is
    /// pinned (`refcount > 0`) and none can be evicted: both are fatal
    /// invariant violations per `spec.md` §4.1/§7.
    pub fn read(&self, sector: u32) -> Buf<'_> {
        assert!(
            sector < self.device.sector_count(),
            "buffer cache: sector {sector} out of device range"
        );
        let start = group_start(sector);

        let mut list = self.list.lock().unwrap();
        if let Some(&slot) = list.index.get(&start) {
            list.refcount[slot] += 1;
            touch_mru(&mut list, slot);
            drop(list);
            let guard = self.slots[slot].mutex.lock().unwrap();
            return Buf {
                cache: self,
                slot,
                guard: Some(guard),
            };
        }

        // Miss: evict the first slot with refcount == 0, scanning from
        // the LRU end (back of `order`).
        let victim = list
            .order
            .iter()
            .rev()
            .copied()
            .find(|&slot| list.refcount[slot] == 0)
            .unwrap_or_else(|| fatal!("buffer cache exhausted: every group is pinned"));

        let old_start = list.starts[victim].take();
        if let Some(old) = old_start {
            let _ = list.index.remove(&old);
        }
        list.starts[victim] = Some(start);
        let _ = list.index.insert(start, victim);
        list.refcount[victim] = 1;
        touch_mru(&mut list, victim);
        drop(list);

        let mut guard = self.slots[victim].mutex.lock().unwrap();
        if guard.dirty {
            let old = old_start.expect("dirty slot must have had a prior group");
            self.device.write_sectors(old, &guard.data);
            guard.dirty = false;
        }
        self.device.read_sectors(start, &mut guard.data);
        guard.valid = true;

        Buf {
            cache: self,
            slot: victim,
            guard: Some(guard),
        }
    }

    /// Convenience wrapper: reads `bytes.len()` bytes at `offset` within
    /// `sector` into `bytes`. Does not cross a sector boundary.
    pub fn read_through(&self, sector: u32, offset: usize, bytes: &mut [u8]) {
        assert!(offset + bytes.len() <= SECTOR_SIZE, "read_through crosses a sector boundary");
        let buf = self.read(sector);
        let start = buf.cache.list.lock().unwrap().starts[buf.slot].unwrap();
        let base = offset_in_group(sector, start) + offset;
        let guard = buf.guard.as_ref().unwrap();
        bytes.copy_from_slice(&guard.data[base..base + bytes.len()]);
    }

    /// Convenience wrapper: writes `bytes` to `offset` within `sector`
    /// and marks the group dirty. Does not cross a sector boundary.
    pub fn write_through(&self, sector: u32, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= SECTOR_SIZE, "write_through crosses a sector boundary");
        let mut buf = self.read(sector);
        let start = buf.cache.list.lock().unwrap().starts[buf.slot].unwrap();
        let base = offset_in_group(sector, start) + offset;
        let guard = buf.guard.as_mut().unwrap();
        guard.data[base..base + bytes.len()].copy_from_slice(bytes);
        guard.dirty = true;
    }

    /// Convenience wrapper: fills `count` bytes at `offset` within
    /// `sector` with `byte` and marks the group dirty.
    pub fn fill(&self, sector: u32, offset: usize, byte: u8, count: usize) {
        assert!(offset + count <= SECTOR_SIZE, "fill crosses a sector boundary");
        let mut buf = self.read(sector);
        let start = buf.cache.list.lock().unwrap().starts[buf.slot].unwrap();
        let base = offset_in_group(sector, start) + offset;
        let guard = buf.guard.as_mut().unwrap();
        guard.data[base..base + count].fill(byte);
        guard.dirty = true;
    }

    /// Writes back every dirty group. Holds the cache-wide lock for the
    /// whole pass, matching the reference implementation's batched
    /// write-back (unlike the single-group path, which never holds the
    /// list lock across I/O).
    pub fn flush_all(&self) {
        let list = self.list.lock().unwrap();
        for slot in 0..self.slots.len() {
            let mut guard = self.slots[slot].mutex.lock().unwrap();
            if guard.dirty {
                let start = list.starts[slot].expect("dirty slot must be occupied");
                self.device.write_sectors(start, &guard.data);
                guard.dirty = false;
            }
        }
    }

    /// Increments the reference count of the group containing `sector`
    /// without acquiring its per-group mutex, preventing its eviction.
    pub fn pin(&self, sector: u32) {
        let mut list = self.list.lock().unwrap();
        let start = group_start(sector);
        match list.index.get(&start) {
            Some(&slot) => list.refcount[slot] += 1,
            None => fatal!("pin: sector {sector} is not cached"),
        }
    }

    /// Decrements the reference count of the group containing `sector`.
    pub fn unpin(&self, sector: u32) {
        let mut list = self.list.lock().unwrap();
        let start = group_start(sector);
        match list.index.get(&start) {
            Some(&slot) => {
                assert!(list.refcount[slot] > 0, "unpin: refcount underflow");
                list.refcount[slot] -= 1;
            }
            None => fatal!("unpin: sector {sector} is not cached"),
        }
    }
}

/// Moves `slot` to the front (MRU end) of the order list.
fn touch_mru(list: &mut CacheList, slot: usize) {
    if let Some(pos) = list.order.iter().position(|&s| s == slot) {
        list.order.remove(pos);
    }
    list.order.push_front(slot);
}

impl Buf<'_> {
    /// The group's raw byte contents (`GROUP_SIZE` bytes).
    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap().data
    }

    /// Mutable access to the group's raw byte contents. The caller is
    /// responsible for calling [`Buf::mark_dirty`] after writing.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard.as_mut().unwrap().data
    }

    /// Marks this group dirty, so it will be written back on eviction
    /// or [`BufferCache::flush_all`].
    pub fn mark_dirty(&mut self) {
        self.guard.as_mut().unwrap().dirty = true;
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // Drop the per-group guard before touching the list lock, so we
        // never hold both at once.
        self.guard = None;
        let mut list = self.cache.list.lock().unwrap();
        assert!(list.refcount[self.slot] > 0, "release: refcount underflow");
        list.refcount[self.slot] -= 1;
        if list.refcount[self.slot] == 0 {
            touch_mru(&mut list, self.slot);
        }
    }
}
