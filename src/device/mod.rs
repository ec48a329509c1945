//! Block device interface consumed by the buffer cache and swap layer.
//!
//! `spec.md` §6 specifies this as an external collaborator: probing and
//! low-level sector I/O are out of scope. What the core actually needs
//! from a device is exactly the [`BlockDevice`] trait below; drivers
//! (virtio, ramdisk, AHCI, ...) implement it and are otherwise opaque to
//! the core.

pub mod mem;

use core::fmt;

use crate::param::SECTOR_SIZE;

/// The role a device plays in the system, mirroring `spec.md` §6.
/// Writing to a [`Role::Foreign`] device is forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Holds the kernel image.
    Kernel,
    /// Holds the filesystem this crate mounts.
    Filesys,
    /// Scratch space, not managed by this crate.
    Scratch,
    /// Backing store for the swap subsystem.
    Swap,
    /// A device handed to user programs verbatim.
    Raw,
    /// Any other device; read-only from the kernel's perspective.
    Foreign,
}

/// A block device: a fixed number of addressable, fixed-size sectors.
///
/// Implementations are assumed to be internally synchronized (`spec.md`
/// §4.1): the buffer cache serializes *its own* access per cached group,
/// but does not assume exclusivity over the device as a whole.
pub trait BlockDevice: fmt::Debug + Send + Sync {
    /// Stable name for diagnostics.
    fn name(&self) -> &str;

    /// The role this device plays.
    fn role(&self) -> Role;

    /// Number of `SECTOR_SIZE`-byte sectors this device exposes.
    fn sector_count(&self) -> u32;

    /// Read exactly one sector into `buf`.
    ///
    /// # Panics
    /// If `buf.len() != SECTOR_SIZE` or `sector >= sector_count()`: an
    /// out-of-range sector is a fatal invariant violation per `spec.md`
    /// §4.1/§7, not a recoverable error.
    fn read_sector(&self, sector: u32, buf: &mut [u8]);

    /// Write exactly one sector from `buf`.
    ///
    /// # Panics
    /// Same conditions as [`BlockDevice::read_sector`], plus writing to
    /// a [`Role::Foreign`] device.
    fn write_sector(&self, sector: u32, buf: &[u8]);

    /// Read `buf.len() / SECTOR_SIZE` contiguous sectors starting at
    /// `start` into `buf`. The default implementation loops over
    /// [`BlockDevice::read_sector`]; a real driver can override this to
    /// issue one multi-sector request.
    fn read_sectors(&self, start: u32, buf: &mut [u8]) {
        assert_eq!(buf.len() % SECTOR_SIZE, 0, "read_sectors: unaligned buffer");
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(start + i as u32, chunk);
        }
    }

    /// Write `buf.len() / SECTOR_SIZE` contiguous sectors starting at
    /// `start` from `buf`.
    fn write_sectors(&self, start: u32, buf: &[u8]) {
        assert_eq!(buf.len() % SECTOR_SIZE, 0, "write_sectors: unaligned buffer");
        for (i, chunk) in buf.chunks(SECTOR_SIZE).enumerate() {
            self.write_sector(start + i as u32, chunk);
        }
    }
}
