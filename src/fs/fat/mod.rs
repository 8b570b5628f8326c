//! FAT filesystem machinery shared by the 12-bit and 32-bit drivers.
//!
//! The two variants differ in allocation-table entry width, root-directory
//! representation (fixed region vs. ordinary cluster chain), and cluster
//! addressing width; everything else (boot sector layout, directory entry
//! format, chain traversal, the table cache) is common and lives here.

pub mod boot;
pub mod chain;
pub mod dir;
pub mod dirent;
pub mod fat12;
pub mod fat32;
pub mod name;
pub mod table;

#[cfg(test)]
pub(crate) mod testimg;

use crate::device::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::{FileSystemError, FileSystemErrorKind, FileType, Result};

use alloc::vec;

use boot::FatGeometry;
use dirent::ShortDirEntry;
use table::FatTable;

/// Allocation-table entry width of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat32,
}

impl FatVariant {
    /// Value written to terminate a chain.
    pub fn end_of_chain(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0xFFF,
            FatVariant::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// True if a table entry marks the end of a chain.
    pub fn is_end_of_chain(self, entry: u32) -> bool {
        match self {
            FatVariant::Fat12 => entry >= 0xFF8,
            FatVariant::Fat32 => (entry & 0x0FFF_FFFF) >= 0x0FFF_FFF8,
        }
    }

    /// Sectors per table-cache window. Three sectors hold a whole number of
    /// 12-bit entries, so no entry straddles an aligned window.
    pub fn window_sectors(self) -> u32 {
        match self {
            FatVariant::Fat12 => 3,
            FatVariant::Fat32 => 4,
        }
    }
}

/// Where a directory's entries are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLocation {
    /// The fixed root area of a 12-bit volume, outside cluster space.
    RootRegion,
    /// An ordinary cluster chain starting at the given cluster.
    Chain(u32),
}

/// Resolved reference to a directory entry.
///
/// Ephemeral: produced by path resolution, carries enough location
/// information to rewrite the on-disk entry in place, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatNode {
    /// Decoded on-disk entry fields.
    pub entry: ShortDirEntry,
    /// Sector and in-sector byte offset of the 32-byte entry, `None` for
    /// the synthetic root node which has no entry of its own.
    pub slot: Option<(u32, usize)>,
    /// Where this node's own content lives.
    pub content: DirLocation,
    /// Content location of the directory containing this node.
    pub parent: DirLocation,
}

impl FatNode {
    pub fn is_directory(&self) -> bool {
        self.slot.is_none() || self.entry.is_directory()
    }

    pub fn file_type(&self) -> FileType {
        if self.is_directory() {
            FileType::Directory
        } else {
            FileType::RegularFile
        }
    }
}

/// A mounted volume: geometry constants plus the table cache.
///
/// Owned exclusively by one driver instance; two mounts never share cache
/// state.
pub struct FatVolume {
    pub geometry: FatGeometry,
    pub table: FatTable,
}

impl FatVolume {
    pub fn new(geometry: FatGeometry) -> Self {
        let table = FatTable::new(
            geometry.variant,
            geometry.fat_start,
            geometry.sectors_per_fat,
            geometry.fat_count,
        );
        Self { geometry, table }
    }

    /// Synthetic node for the volume root.
    pub fn root_node(&self) -> FatNode {
        let root = self.geometry.root_location();
        let start = match root {
            DirLocation::RootRegion => 0,
            DirLocation::Chain(cluster) => cluster,
        };
        FatNode {
            entry: ShortDirEntry::directory([b' '; 11], start),
            slot: None,
            content: root,
            parent: root,
        }
    }

    /// Content location for a resolved entry. On a 12-bit volume a
    /// directory entry whose start cluster is zero designates the root.
    pub fn content_of(&self, entry: &ShortDirEntry) -> DirLocation {
        if self.geometry.variant == FatVariant::Fat12
            && entry.is_directory()
            && entry.start_cluster == 0
        {
            DirLocation::RootRegion
        } else {
            DirLocation::Chain(entry.start_cluster)
        }
    }

    /// Cluster number stored in a `..` entry for children of `parent`.
    pub fn parent_designator(&self, parent: DirLocation) -> u32 {
        match parent {
            DirLocation::RootRegion => 0,
            DirLocation::Chain(cluster) => cluster,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.geometry.sectors_per_cluster as usize * SECTOR_SIZE
    }

    /// Read one whole cluster into `buffer`.
    pub fn read_cluster(
        &self,
        device: &dyn BlockDevice,
        cluster: u32,
        buffer: &mut [u8],
    ) -> Result<()> {
        let lba = self.geometry.cluster_to_lba(cluster)?;
        device.read_sectors(lba, self.geometry.sectors_per_cluster, buffer)?;
        Ok(())
    }

    /// Write one whole cluster from `buffer`.
    pub fn write_cluster(
        &self,
        device: &dyn BlockDevice,
        cluster: u32,
        buffer: &[u8],
    ) -> Result<()> {
        let lba = self.geometry.cluster_to_lba(cluster)?;
        device.write_sectors(lba, self.geometry.sectors_per_cluster, buffer)?;
        Ok(())
    }

    /// Zero-fill a cluster's data region.
    pub fn clear_cluster(&self, device: &dyn BlockDevice, cluster: u32) -> Result<()> {
        let zeros = vec![0u8; self.cluster_size()];
        self.write_cluster(device, cluster, &zeros)
    }
}

/// Rewrite one 32-byte directory entry in place, read-modify-writing the
/// containing sector.
pub fn write_entry_at(
    device: &dyn BlockDevice,
    sector: u32,
    offset: usize,
    raw: &[u8; dirent::DIR_ENTRY_SIZE],
) -> Result<()> {
    let mut buffer = [0u8; SECTOR_SIZE];
    device.read_sectors(sector, 1, &mut buffer)?;
    buffer[offset..offset + dirent::DIR_ENTRY_SIZE].copy_from_slice(raw);
    device.write_sectors(sector, 1, &buffer)?;
    Ok(())
}

pub(crate) fn invalid_cluster_error() -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::BrokenFileSystem,
        message: "cluster number out of range",
    }
}

pub(crate) fn not_a_file_error() -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::NotAFile,
        message: "path names a directory",
    }
}

pub(crate) fn not_a_directory_error() -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::NotADirectory,
        message: "path does not name a directory",
    }
}
