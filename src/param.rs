//! Compile-time sizing of every bounded resource the core manages.
//!
//! Mirrors the quantities `spec.md` leaves as "configurable" or gives a
//! reference value for: the buffer cache's group size and pool size, the
//! frame pool caps, and the per-process descriptor table size.

/// Bytes per sector, the filesystem and swap devices' common unit.
pub const SECTOR_SIZE: usize = 512;

/// Sectors per cached group (`K` in `spec.md` §3). `K * SECTOR_SIZE` is
/// the buffer cache's unit of caching.
pub const GROUP_SECTORS: usize = 4;

/// Bytes per cached group.
pub const GROUP_SIZE: usize = GROUP_SECTORS * SECTOR_SIZE;

/// Number of cached groups held by the buffer cache.
pub const NBUF: usize = 32;

/// Directory-entry name length, fixed per `spec.md` §6 for a portable
/// packed 20-byte directory entry layout.
pub const NAME_MAX: usize = 14;

/// Direct block pointers in an inode.
pub const NDIRECT: usize = 9;

/// Pointers held by one indirect block (`512 / 4`).
pub const NINDIRECT: usize = SECTOR_SIZE / 4;

/// Pointers reachable through the double-indirect pointer.
pub const NDINDIRECT: usize = NINDIRECT * NINDIRECT;

/// Total block pointer slots in the on-disk inode's fixed `addr` array
/// (`spec.md` §6: `u32 addr[12]`). Only `NDIRECT` (9) + 1 single-indirect
/// + 1 double-indirect = 11 of these are ever consulted; index
/// `NADDR - 1` stays `SENTINEL` and unused, matching the fixed 12-slot
/// on-disk layout inherited from the reference source.
pub const NADDR: usize = 12;

/// Index of the single-indirect pointer within `addr`.
pub const INDIRECT_IDX: usize = NDIRECT;

/// Index of the double-indirect pointer within `addr`.
pub const DINDIRECT_IDX: usize = NDIRECT + 1;

/// Largest file size representable by the block map, in sectors.
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NDINDIRECT;

/// Sentinel block-pointer value meaning "not allocated".
pub const SENTINEL: u32 = u32::MAX;

/// Open files per process (`NOFILE`).
pub const NOFILE: usize = 16;

/// Maximum number of in-memory inode handles held at once.
pub const NINODE: usize = 50;

/// Maximum file path length in bytes.
pub const MAXPATH: usize = 128;

/// Page size in bytes, the virtual memory manager's unit of mapping.
pub const PAGE_SIZE: usize = 4096;

/// Sectors per page (`4096 / 512`), the unit of a swap-slot transfer.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Cap on a process's writable frame pool.
pub const NUM_FRAMES_W: usize = 160;

/// Cap on a process's read-only frame pool.
pub const NUM_FRAMES_R: usize = 16;

/// Sector reserved at the start of the filesystem device, holding the
/// boot sector (owned by a collaborator outside this crate's scope).
pub const BOOT_SECTOR: u32 = 0;

/// Sector holding the free-map's inode.
pub const FREE_MAP_SECTOR: u32 = 1;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 2;

/// First sector after the fixed boot/free-map/root-dir sectors, where
/// the free-map's own bitmap bytes are stored. The free map marks these
/// sectors allocated at format time, so the general allocator never
/// hands them out even though nothing else enforces the boundary.
pub const RESERVED_SECTORS: u32 = 3;

/// Stack-growth heuristic window below the current user stack pointer,
/// generalized per `spec.md` §9 from the x86-specific "4 or 32 bytes"
/// (the `push`/`pusha`-equivalent footprints) to a symbolic byte count.
pub const STACK_GROWTH_SLACK: usize = 32;

/// Upper bound on how far a process's stack may grow below its current
/// stack pointer, delimiting the "stack region" `mmap` (`spec.md` §4.8)
/// must refuse to place a file-backed VMA into.
pub const STACK_MAX_SIZE: u64 = 1024 * 1024;
