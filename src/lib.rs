//! Storage-and-memory core of a small teaching operating system.
//!
//! This crate implements the four engines that sit beneath a teaching
//! kernel's system-call layer: a sector-oriented buffer cache, an
//! on-disk inode/directory filesystem, a per-process demand-paged
//! virtual memory manager, and a swap subsystem backing it. Device
//! drivers, the thread scheduler, the ELF loader, and the syscall
//! trampoline are collaborators this crate consumes through the
//! [`device::BlockDevice`] trait rather than implements.

#![deny(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

pub mod bio;
pub mod bitmap;
pub mod device;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod param;
pub mod process;
pub mod swap;
pub mod syscall;
pub mod vm;

pub use error::{KernelError, Result};
pub use kernel::Kernel;
pub use process::Process;
