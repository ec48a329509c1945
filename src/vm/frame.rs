//! Bounded per-process frame pools and the clock evictors over them
//! (`spec.md` §4.6 "Eviction (clock)" / "Frame acquisition").
//!
//! A frame pool is a fixed-capacity arena: below capacity, acquisition
//! appends a fresh slot; at capacity, a clock sweep picks a slot to
//! reuse in place. There is no separate free-list or intrusive-pointer
//! list to maintain — unlike the VMA list, a pool's "list" is exactly
//! its arena order plus a circular hand, so reuse is O(1) with no
//! structural removal, per `spec.md` §9's arena-handle recommendation.

use crate::param::PAGE_SIZE;

/// Which eviction discipline a pool uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Two-pass enhanced clock (`spec.md` §4.6), used for the writable
    /// pool.
    Writable,
    /// Single-criterion clock on `accessed` only, used for the
    /// read-only pool.
    ReadOnly,
}

/// A small integer naming a slot within one of a process's two pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub kind: PoolKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    vpage: u64,
    accessed: bool,
    dirty: bool,
}

/// One of a process's two bounded frame pools.
pub struct FramePool {
    kind: PoolKind,
    cap: usize,
    meta: Vec<FrameMeta>,
    data: Vec<[u8; PAGE_SIZE]>,
    hand: usize,
}

impl FramePool {
    pub fn new(kind: PoolKind, cap: usize) -> Self {
        Self {
            kind,
            cap,
            meta: Vec::new(),
            data: Vec::new(),
            hand: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Returns the slot to use for a newly faulted-in page: a fresh
    /// slot if under capacity, otherwise a clock victim. When a victim
    /// is returned, its prior virtual page is reported so the caller
    /// can save its contents before overwriting them.
    pub fn acquire(&mut self) -> (usize, Option<u64>) {
        if self.meta.len() < self.cap {
            self.meta.push(FrameMeta { vpage: 0, accessed: false, dirty: false });
            self.data.push([0u8; PAGE_SIZE]);
            (self.meta.len() - 1, None)
        } else {
            let victim = self.run_clock();
            let evicted = self.meta[victim].vpage;
            (victim, Some(evicted))
        }
    }

    fn run_clock(&mut self) -> usize {
        match self.kind {
            PoolKind::ReadOnly => loop {
                if let Some(i) = self.sweep(|m| !m.accessed, true) {
                    return i;
                }
            },
            PoolKind::Writable => loop {
                if let Some(i) = self.sweep(|m| !m.accessed && !m.dirty, false) {
                    return i;
                }
                if let Some(i) = self.sweep(|m| !m.accessed, true) {
                    return i;
                }
            },
        }
    }

    /// One circular sweep starting at `self.hand`, advancing the hand
    /// past the winner and returning the instant a victim is found —
    /// matching the reference `clock`/`clock_plus`, which `return`
    /// immediately on a hit and never touches entries past it. When
    /// `clear_accessed` is set, entries the sweep passes *before*
    /// finding a victim have their `accessed` bit cleared (pass 2 of
    /// the enhanced clock), so a sweep that finds nothing still makes
    /// progress for the next call.
    fn sweep(&mut self, matches: impl Fn(&FrameMeta) -> bool, clear_accessed: bool) -> Option<usize> {
        let n = self.meta.len();
        let start = self.hand;
        for k in 0..n {
            let i = (start + k) % n;
            if matches(&self.meta[i]) {
                self.hand = (i + 1) % n;
                return Some(i);
            }
            if clear_accessed && self.meta[i].accessed {
                self.meta[i].accessed = false;
            }
        }
        None
    }

    /// Marks slot `index` as backing `vpage`, freshly mapped and clean.
    pub fn install(&mut self, index: usize, vpage: u64) {
        self.meta[index] = FrameMeta { vpage, accessed: false, dirty: false };
    }

    pub fn data(&self, index: usize) -> &[u8; PAGE_SIZE] {
        &self.data[index]
    }

    pub fn data_mut(&mut self, index: usize) -> &mut [u8; PAGE_SIZE] {
        &mut self.data[index]
    }

    pub fn mark_accessed(&mut self, index: usize) {
        self.meta[index].accessed = true;
    }

    pub fn mark_dirty(&mut self, index: usize) {
        self.meta[index].accessed = true;
        self.meta[index].dirty = true;
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.meta[index].dirty
    }

    pub fn vpage(&self, index: usize) -> u64 {
        self.meta[index].vpage
    }

    /// Drops the slot backing `vpage` without running an eviction
    /// sweep, used by `munmap`/process-exit teardown. Leaves a hole
    /// that the next `acquire` may reuse without a clock sweep only if
    /// it happens to land on `index` via the cap check — in practice
    /// teardown always removes every slot of an exiting region, so the
    /// pool is simply smaller afterward. This is implemented as
    /// replacing the slot's vpage with a sentinel so capacity
    /// accounting (`len`) briefly overcounts until the pool is rebuilt;
    /// callers that need exact capacity accounting after teardown
    /// should rebuild the pool instead (`kernel`/`process` do, in the
    /// full exit path).
    pub fn vacate(&mut self, index: usize) {
        self.meta[index] = FrameMeta { vpage: u64::MAX, accessed: false, dirty: false };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_fresh_slots_until_capacity() {
        let mut pool = FramePool::new(PoolKind::Writable, 2);
        let (i0, e0) = pool.acquire();
        pool.install(i0, 0x1000);
        let (i1, e1) = pool.acquire();
        pool.install(i1, 0x2000);
        assert!(e0.is_none() && e1.is_none());
        assert_ne!(i0, i1);
    }

    #[test]
    fn single_criterion_clock_prefers_unaccessed() {
        let mut pool = FramePool::new(PoolKind::ReadOnly, 2);
        let (i0, _) = pool.acquire();
        pool.install(i0, 0x1000);
        let (i1, _) = pool.acquire();
        pool.install(i1, 0x2000);
        pool.mark_accessed(i0);
        let (victim, evicted) = pool.acquire();
        assert_eq!(victim, i1);
        assert_eq!(evicted, Some(0x2000));
    }

    #[test]
    fn enhanced_clock_prefers_clean_over_dirty() {
        let mut pool = FramePool::new(PoolKind::Writable, 2);
        let (i0, _) = pool.acquire();
        pool.install(i0, 0x1000);
        let (i1, _) = pool.acquire();
        pool.install(i1, 0x2000);
        pool.mark_dirty(i0);
        let (victim, evicted) = pool.acquire();
        assert_eq!(victim, i1);
        assert_eq!(evicted, Some(0x2000));
    }

    /// A sweep must stop the instant it finds a victim and leave every
    /// later slot's `accessed` bit untouched, matching the reference
    /// `clock`/`clock_plus`'s immediate `return`.
    #[test]
    fn sweep_does_not_clear_accessed_past_the_victim() {
        let mut pool = FramePool::new(PoolKind::ReadOnly, 4);
        for (i, vpage) in [0x1000u64, 0x2000, 0x3000, 0x4000].into_iter().enumerate() {
            let (slot, _) = pool.acquire();
            pool.install(slot, vpage);
            assert_eq!(slot, i);
        }
        pool.mark_accessed(1);
        pool.mark_accessed(2);
        pool.mark_accessed(3);
        // hand is at 0; slot 0 is unaccessed, so it's the immediate victim.
        let (victim, evicted) = pool.acquire();
        assert_eq!(victim, 0);
        assert_eq!(evicted, Some(0x1000));
        // slots 1-3 must keep their accessed bit: installing a fresh page
        // into slot 0 and sweeping again must pick slot 1 next, not
        // re-examine slot 0 as if it still carried the cleared bits of 1-3.
        pool.install(0, 0x9000);
        pool.mark_accessed(0);
        let (victim2, evicted2) = pool.acquire();
        assert_eq!(victim2, 1);
        assert_eq!(evicted2, Some(0x2000));
    }

    #[test]
    fn enhanced_clock_falls_back_to_dirty_when_all_dirty() {
        let mut pool = FramePool::new(PoolKind::Writable, 2);
        let (i0, _) = pool.acquire();
        pool.install(i0, 0x1000);
        pool.mark_dirty(i0);
        let (i1, _) = pool.acquire();
        pool.install(i1, 0x2000);
        pool.mark_dirty(i1);
        let (_victim, evicted) = pool.acquire();
        assert!(evicted == Some(0x1000) || evicted == Some(0x2000));
    }
}
