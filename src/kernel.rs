//! Global kernel state: the mounted file system and swap space
//! (`spec.md` §9 "thread a single `Kernel` value through entry points,
//! not module-level globals").

use std::sync::{Arc, Mutex};

use crate::device::BlockDevice;
use crate::fs::Fs;
use crate::swap::SwapSpace;

/// The system-wide state every syscall entry point is handed, alongside
/// the calling process's own `&mut Process`. `Fs` and `SwapSpace` already
/// guard their own internals (the buffer cache's list/group mutexes, the
/// inode table's mutex, the swap bitmap's mutex); `fs_ops` additionally
/// serializes the multi-step path/directory-entry operations
/// (`create`/`remove`/`mkdir`/`chdir`) that touch several of those in
/// sequence and are not atomic as a whole otherwise.
pub struct Kernel {
    pub fs: Fs,
    pub swap: SwapSpace,
    pub fs_ops: Mutex<()>,
}

impl Kernel {
    pub fn new(fs: Fs, swap_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            fs,
            swap: SwapSpace::new(swap_device),
            fs_ops: Mutex::new(()),
        }
    }
}
