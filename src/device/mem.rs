//! An in-memory `BlockDevice`, standing in for the out-of-scope real
//! driver in tests and in any embedder that wants a RAM disk.

use std::sync::Mutex;

use super::{BlockDevice, Role};
use crate::param::SECTOR_SIZE;

/// A block device backed entirely by a `Vec<u8>`.
#[derive(Debug)]
pub struct MemDevice {
    name: String,
    role: Role,
    sectors: Mutex<Vec<u8>>,
    sector_count: u32,
}

impl MemDevice {
    /// Creates a zero-filled device of `sector_count` sectors.
    pub fn new(name: impl Into<String>, role: Role, sector_count: u32) -> Self {
        Self {
            name: name.into(),
            role,
            sectors: Mutex::new(vec![0u8; sector_count as usize * SECTOR_SIZE]),
            sector_count,
        }
    }
}

impl BlockDevice for MemDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "read_sector: buffer is not one sector");
        assert!(sector < self.sector_count, "read_sector: sector out of range");
        let data = self.sectors.lock().unwrap();
        let off = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&data[off..off + SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "write_sector: buffer is not one sector");
        assert!(sector < self.sector_count, "write_sector: sector out of range");
        assert_ne!(self.role, Role::Foreign, "write_sector: device is foreign (read-only)");
        let mut data = self.sectors.lock().unwrap();
        let off = sector as usize * SECTOR_SIZE;
        data[off..off + SECTOR_SIZE].copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sector() {
        let dev = MemDevice::new("test", Role::Filesys, 16);
        let mut buf = [0xABu8; SECTOR_SIZE];
        dev.write_sector(3, &buf);
        buf.fill(0);
        dev.read_sector(3, &mut buf);
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn rejects_out_of_range_sector() {
        let dev = MemDevice::new("test", Role::Filesys, 4);
        let buf = [0u8; SECTOR_SIZE];
        dev.write_sector(10, &buf);
    }

    #[test]
    #[should_panic(expected = "foreign")]
    fn rejects_writes_to_foreign_devices() {
        let dev = MemDevice::new("test", Role::Foreign, 4);
        let buf = [0u8; SECTOR_SIZE];
        dev.write_sector(0, &buf);
    }
}
