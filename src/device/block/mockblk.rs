use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::{BlockDevice, BlockIOError, BlockIOResult, SECTOR_SIZE};

/// In-memory block device used by the test suites.
///
/// Sector-granular storage behind a mutex, plus a counter of write calls so
/// tests can observe whether a cache flush actually touched the device.
pub struct MockBlockDevice {
    disk_name: &'static str,
    data: Mutex<Vec<Vec<u8>>>,
    write_calls: AtomicUsize,
}

impl MockBlockDevice {
    pub fn new(disk_name: &'static str, sector_count: usize) -> Self {
        let mut data = Vec::with_capacity(sector_count);
        for _ in 0..sector_count {
            data.push(vec![0; SECTOR_SIZE]);
        }

        Self {
            disk_name,
            data: Mutex::new(data),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Build a device preloaded with an image. Missing trailing sectors are
    /// zero-filled up to `sector_count`.
    pub fn with_image(disk_name: &'static str, sector_count: usize, image: &[Vec<u8>]) -> Self {
        let device = Self::new(disk_name, sector_count);
        {
            let mut data = device.data.lock();
            for (i, sector) in image.iter().enumerate().take(sector_count) {
                data[i][..sector.len()].copy_from_slice(sector);
            }
        }
        device
    }

    /// Number of `write_sectors` calls issued so far.
    pub fn write_count(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }

    /// Snapshot of one sector, for asserting on-disk state in tests.
    pub fn sector(&self, lba: usize) -> Vec<u8> {
        self.data.lock()[lba].clone()
    }
}

impl BlockDevice for MockBlockDevice {
    fn disk_name(&self) -> &'static str {
        self.disk_name
    }

    fn sector_count(&self) -> usize {
        self.data.lock().len()
    }

    fn read_sectors(&self, lba: u32, sectors: u32, buffer: &mut [u8]) -> BlockIOResult<()> {
        if buffer.len() < sectors as usize * SECTOR_SIZE {
            return Err(BlockIOError::ShortBuffer);
        }
        let data = self.data.lock();
        let end = lba as usize + sectors as usize;
        if end > data.len() {
            return Err(BlockIOError::OutOfRange);
        }
        for i in 0..sectors as usize {
            let offset = i * SECTOR_SIZE;
            buffer[offset..offset + SECTOR_SIZE].copy_from_slice(&data[lba as usize + i]);
        }
        Ok(())
    }

    fn write_sectors(&self, lba: u32, sectors: u32, buffer: &[u8]) -> BlockIOResult<()> {
        if buffer.len() < sectors as usize * SECTOR_SIZE {
            return Err(BlockIOError::ShortBuffer);
        }
        let mut data = self.data.lock();
        let end = lba as usize + sectors as usize;
        if end > data.len() {
            return Err(BlockIOError::OutOfRange);
        }
        for i in 0..sectors as usize {
            let offset = i * SECTOR_SIZE;
            data[lba as usize + i].copy_from_slice(&buffer[offset..offset + SECTOR_SIZE]);
        }
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
