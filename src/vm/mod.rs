//! Per-process virtual memory: VMAs, frame pools, demand paging, and
//! `mmap`/`munmap` (`spec.md` §4.6/§4.8).

pub mod fault;
pub mod frame;
pub mod mmap;
pub mod vma;

pub use fault::handle_page_fault;
pub use frame::{FramePool, FrameRef, PoolKind};
pub use mmap::{mmap, munmap, MmapId};
pub use vma::{Backing, Perm, Vma, VmaList};
