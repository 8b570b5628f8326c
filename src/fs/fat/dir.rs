//! Directory scanning, entry insertion, and path resolution.
//!
//! A directory is either the fixed root area of a 12-bit volume or an
//! ordinary cluster chain. Scans are linear over 32-byte entries and stop
//! at the first `0x00` entry. Insertion reuses a tombstoned slot first,
//! then the end-of-directory slot, and only then grows the chain by one
//! cluster; the fixed root area cannot grow.

use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use super::dirent::{
    self, DIR_ENTRY_SIZE, ENTRY_SIZE_FIELD, ENTRY_TOMBSTONE, ShortDirEntry,
};
use super::name::encode_short_name;
use super::{DirLocation, FatNode, FatVolume, write_entry_at};
use crate::device::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::{DirectoryEntryInfo, FileSystemError, FileSystemErrorKind, FileType, Result};

/// A directory entry located on disk, with enough position information to
/// rewrite it in place.
#[derive(Debug, Clone, Copy)]
pub struct EntrySlot {
    pub sector: u32,
    pub offset: usize,
    pub raw: [u8; DIR_ENTRY_SIZE],
    pub entry: ShortDirEntry,
}

/// Outcome of scanning a directory for a name.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The name matched this entry.
    Found(EntrySlot),
    /// No match; this slot (first tombstone, or the end marker's position)
    /// can hold a new entry.
    FreeSlot(EntrySlot),
    /// No match and no usable slot within the directory's current extent.
    EndOfDirectory,
}

impl FatVolume {
    /// Sector numbers holding a directory's entries, in scan order.
    fn directory_sectors(
        &mut self,
        device: &dyn BlockDevice,
        dir: DirLocation,
    ) -> Result<Vec<u32>> {
        match dir {
            DirLocation::RootRegion => Ok((0..self.geometry.root_sectors)
                .map(|i| self.geometry.root_start + i)
                .collect()),
            DirLocation::Chain(start) => {
                let chain = self.chain_clusters(device, start)?;
                let per_cluster = self.geometry.sectors_per_cluster;
                let mut sectors = Vec::with_capacity(chain.len() * per_cluster as usize);
                for cluster in chain {
                    let lba = self.geometry.cluster_to_lba(cluster)?;
                    for s in 0..per_cluster {
                        sectors.push(lba + s);
                    }
                }
                Ok(sectors)
            }
        }
    }

    /// Scan `dir` for the canonical `name`.
    ///
    /// Long-name continuation entries are skipped, not parsed. Hidden
    /// entries still match by name; only listings exclude them.
    pub fn find_in_directory(
        &mut self,
        device: &dyn BlockDevice,
        dir: DirLocation,
        name: &[u8; 11],
    ) -> Result<ScanOutcome> {
        let sectors = self.directory_sectors(device, dir)?;
        let entry_cap = match dir {
            DirLocation::RootRegion => self.geometry.root_entries as usize,
            DirLocation::Chain(_) => usize::MAX,
        };

        let mut free: Option<EntrySlot> = None;
        let mut buffer = [0u8; SECTOR_SIZE];
        let mut index = 0usize;

        for sector in sectors {
            device.read_sectors(sector, 1, &mut buffer)?;
            for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                if index >= entry_cap {
                    return Ok(free.map_or(ScanOutcome::EndOfDirectory, ScanOutcome::FreeSlot));
                }
                index += 1;

                let mut raw = [0u8; DIR_ENTRY_SIZE];
                raw.copy_from_slice(&buffer[offset..offset + DIR_ENTRY_SIZE]);
                let entry = ShortDirEntry::decode(&raw);
                let slot = EntrySlot {
                    sector,
                    offset,
                    raw,
                    entry,
                };

                if dirent::is_end_marker(&raw) {
                    return Ok(ScanOutcome::FreeSlot(free.unwrap_or(slot)));
                }
                if dirent::is_tombstone(&raw) {
                    if free.is_none() {
                        free = Some(slot);
                    }
                    continue;
                }
                if entry.is_long_name() || entry.is_volume_label() {
                    continue;
                }
                if &entry.name == name {
                    return Ok(ScanOutcome::Found(slot));
                }
            }
        }

        Ok(free.map_or(ScanOutcome::EndOfDirectory, ScanOutcome::FreeSlot))
    }

    /// Stream visible entries into `out`. Hidden, deleted, long-name and
    /// volume-label entries are excluded. Returns the count written,
    /// truncated at `out.len()` without error.
    pub fn list_directory(
        &mut self,
        device: &dyn BlockDevice,
        dir: DirLocation,
        out: &mut [DirectoryEntryInfo],
    ) -> Result<usize> {
        let sectors = self.directory_sectors(device, dir)?;
        let entry_cap = match dir {
            DirLocation::RootRegion => self.geometry.root_entries as usize,
            DirLocation::Chain(_) => usize::MAX,
        };

        let mut buffer = [0u8; SECTOR_SIZE];
        let mut index = 0usize;
        let mut count = 0usize;

        for sector in sectors {
            device.read_sectors(sector, 1, &mut buffer)?;
            for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                if index >= entry_cap {
                    return Ok(count);
                }
                index += 1;

                let mut raw = [0u8; DIR_ENTRY_SIZE];
                raw.copy_from_slice(&buffer[offset..offset + DIR_ENTRY_SIZE]);
                if dirent::is_end_marker(&raw) {
                    return Ok(count);
                }
                if dirent::is_tombstone(&raw) {
                    continue;
                }
                let entry = ShortDirEntry::decode(&raw);
                if entry.is_long_name() || entry.is_volume_label() || entry.is_hidden() {
                    continue;
                }
                if count == out.len() {
                    return Ok(count);
                }
                out[count] = DirectoryEntryInfo {
                    name: super::name::decode_short_name(&entry.name),
                    file_type: entry.file_type(),
                    size: entry.size,
                };
                count += 1;
            }
        }

        Ok(count)
    }

    /// Extend a chain directory by one zero-filled cluster and return the
    /// first slot of the new cluster.
    fn grow_directory(&mut self, device: &dyn BlockDevice, start: u32) -> Result<EntrySlot> {
        let chain = self.chain_clusters(device, start)?;
        let last = chain[chain.len() - 1];
        let cluster = self.allocate_cluster(device, last)?;
        let raw = [0u8; DIR_ENTRY_SIZE];
        Ok(EntrySlot {
            sector: self.geometry.cluster_to_lba(cluster)?,
            offset: 0,
            raw,
            entry: ShortDirEntry::decode(&raw),
        })
    }

    /// Create a new zero-size entry named `name` in `dir`.
    ///
    /// One cluster is allocated for the new node's content; a directory's
    /// cluster is pre-populated with `.` and `..` before the entry is
    /// linked into its parent.
    pub fn create_entry(
        &mut self,
        device: &dyn BlockDevice,
        dir: DirLocation,
        name: &[u8; 11],
        file_type: FileType,
    ) -> Result<FatNode> {
        let slot = match self.find_in_directory(device, dir, name)? {
            ScanOutcome::Found(_) => {
                return Err(FileSystemError {
                    kind: FileSystemErrorKind::AlreadyExists,
                    message: "name already exists in directory",
                });
            }
            ScanOutcome::FreeSlot(slot) => slot,
            ScanOutcome::EndOfDirectory => match dir {
                DirLocation::Chain(start) => self.grow_directory(device, start)?,
                DirLocation::RootRegion => {
                    return Err(FileSystemError {
                        kind: FileSystemErrorKind::DirectoryFull,
                        message: "root directory is full",
                    });
                }
            },
        };

        let cluster = self.allocate_cluster(device, 0)?;
        let entry = match file_type {
            FileType::RegularFile => ShortDirEntry::file(*name, cluster),
            FileType::Directory => ShortDirEntry::directory(*name, cluster),
        };

        if file_type == FileType::Directory {
            self.init_directory_cluster(device, cluster, self.parent_designator(dir))?;
        }

        write_entry_at(device, slot.sector, slot.offset, &entry.encode())?;
        debug!(
            "created entry at sector {} offset {} cluster {}",
            slot.sector, slot.offset, cluster
        );

        Ok(FatNode {
            entry,
            slot: Some((slot.sector, slot.offset)),
            content: DirLocation::Chain(cluster),
            parent: dir,
        })
    }

    /// Write `.` and `..` into the first two slots of a fresh directory
    /// cluster. `parent` is the containing directory's cluster, or zero
    /// when the parent is the fixed root area.
    fn init_directory_cluster(
        &mut self,
        device: &dyn BlockDevice,
        cluster: u32,
        parent: u32,
    ) -> Result<()> {
        let mut buffer = vec![0u8; self.cluster_size()];
        let dot = ShortDirEntry::directory(*b".          ", cluster);
        let dotdot = ShortDirEntry::directory(*b"..         ", parent);
        buffer[..DIR_ENTRY_SIZE].copy_from_slice(&dot.encode());
        buffer[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.encode());
        self.write_cluster(device, cluster, &buffer)
    }

    /// Walk `path` segment by segment starting from `start` (or from the
    /// root when the path begins with a separator). Fails with `NotFound`
    /// at the first missing segment and `NotADirectory` when a non-final
    /// segment is not a directory.
    pub fn resolve_path(
        &mut self,
        device: &dyn BlockDevice,
        start: &FatNode,
        path: &str,
    ) -> Result<FatNode> {
        let mut current = if path.starts_with('/') {
            self.root_node()
        } else {
            *start
        };

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_directory() {
                return Err(FileSystemError {
                    kind: FileSystemErrorKind::NotADirectory,
                    message: "path component is not a directory",
                });
            }
            let name = encode_short_name(segment)?;
            match self.find_in_directory(device, current.content, &name)? {
                ScanOutcome::Found(slot) => {
                    current = FatNode {
                        entry: slot.entry,
                        slot: Some((slot.sector, slot.offset)),
                        content: self.content_of(&slot.entry),
                        parent: current.content,
                    };
                }
                _ => {
                    return Err(FileSystemError {
                        kind: FileSystemErrorKind::NotFound,
                        message: "path not found",
                    });
                }
            }
        }

        Ok(current)
    }
}

/// Split a path into its parent directory part (separator kept) and the
/// final component.
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => (&trimmed[..i + 1], &trimmed[i + 1..]),
        None => ("", trimmed),
    }
}

/// Mark a node's on-disk entry deleted. The slot may be reused by a later
/// creation; the entry is never physically removed.
pub fn tombstone_entry(device: &dyn BlockDevice, node: &FatNode) -> Result<()> {
    let (sector, offset) = node.slot.ok_or(FileSystemError {
        kind: FileSystemErrorKind::InvalidHandle,
        message: "root directory has no entry to remove",
    })?;
    let mut buffer = [0u8; SECTOR_SIZE];
    device.read_sectors(sector, 1, &mut buffer)?;
    buffer[offset] = ENTRY_TOMBSTONE;
    device.write_sectors(sector, 1, &buffer)?;
    Ok(())
}

/// Rewrite only the size field of a node's on-disk entry, leaving every
/// other byte untouched.
pub fn update_entry_size(device: &dyn BlockDevice, node: &FatNode) -> Result<()> {
    let (sector, offset) = node.slot.ok_or(FileSystemError {
        kind: FileSystemErrorKind::InvalidHandle,
        message: "node has no entry slot",
    })?;
    let mut buffer = [0u8; SECTOR_SIZE];
    device.read_sectors(sector, 1, &mut buffer)?;
    buffer[offset + ENTRY_SIZE_FIELD..offset + ENTRY_SIZE_FIELD + 4]
        .copy_from_slice(&node.entry.size.to_le_bytes());
    device.write_sectors(sector, 1, &buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::boot::BootSector;
    use crate::fs::fat::dirent::FatAttributes;
    use crate::fs::fat::testimg;

    fn fat12_volume() -> (
        alloc::sync::Arc<crate::device::block::mockblk::MockBlockDevice>,
        FatVolume,
    ) {
        let device = testimg::fat12_device();
        let boot = BootSector::parse(&device.sector(0)).unwrap();
        let volume = FatVolume::new(boot.geometry());
        (device, volume)
    }

    #[test]
    fn test_create_then_find_in_root() {
        let (device, mut volume) = fat12_volume();
        let name = encode_short_name("HELLO.TXT").unwrap();

        let node = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &name, FileType::RegularFile)
            .unwrap();
        assert_eq!(node.entry.size, 0);
        assert!(node.entry.start_cluster >= 2);

        match volume
            .find_in_directory(device.as_ref(), DirLocation::RootRegion, &name)
            .unwrap()
        {
            ScanOutcome::Found(slot) => assert_eq!(slot.entry, node.entry),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_create_collides() {
        let (device, mut volume) = fat12_volume();
        let name = encode_short_name("HELLO.TXT").unwrap();

        volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &name, FileType::RegularFile)
            .unwrap();
        let err = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &name, FileType::RegularFile)
            .unwrap_err();
        assert_eq!(err.kind, FileSystemErrorKind::AlreadyExists);
    }

    #[test]
    fn test_tombstone_slot_reused_before_growth() {
        let (device, mut volume) = fat12_volume();
        let first = encode_short_name("FIRST").unwrap();
        let second = encode_short_name("SECOND").unwrap();
        let third = encode_short_name("THIRD").unwrap();

        let a = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &first, FileType::RegularFile)
            .unwrap();
        volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &second, FileType::RegularFile)
            .unwrap();

        tombstone_entry(device.as_ref(), &a).unwrap();
        let b = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &third, FileType::RegularFile)
            .unwrap();
        // The deleted entry's slot is taken over, not a fresh one.
        assert_eq!(b.slot, a.slot);
    }

    #[test]
    fn test_listing_skips_hidden_and_deleted() {
        let (device, mut volume) = fat12_volume();
        let visible = encode_short_name("SHOWN").unwrap();
        let hidden = encode_short_name("GHOST").unwrap();
        let doomed = encode_short_name("GONE").unwrap();

        volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &visible, FileType::RegularFile)
            .unwrap();
        let mut hidden_node = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &hidden, FileType::RegularFile)
            .unwrap();
        hidden_node.entry.attributes |= FatAttributes::HIDDEN;
        write_entry_at(
            device.as_ref(),
            hidden_node.slot.unwrap().0,
            hidden_node.slot.unwrap().1,
            &hidden_node.entry.encode(),
        )
        .unwrap();
        let doomed_node = volume
            .create_entry(device.as_ref(), DirLocation::RootRegion, &doomed, FileType::RegularFile)
            .unwrap();
        tombstone_entry(device.as_ref(), &doomed_node).unwrap();

        let mut out = vec![
            DirectoryEntryInfo {
                name: alloc::string::String::new(),
                file_type: FileType::RegularFile,
                size: 0,
            };
            8
        ];
        let count = volume
            .list_directory(device.as_ref(), DirLocation::RootRegion, &mut out)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(out[0].name, "SHOWN");

        // Hidden entries are still resolvable by name.
        assert!(matches!(
            volume
                .find_in_directory(device.as_ref(), DirLocation::RootRegion, &hidden)
                .unwrap(),
            ScanOutcome::Found(_)
        ));
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/sub"), ("/", "sub"));
        assert_eq!(split_parent("a/b/c.txt"), ("a/b/", "c.txt"));
        assert_eq!(split_parent("file.txt"), ("", "file.txt"));
        assert_eq!(split_parent("/a/b/"), ("/a/", "b"));
    }
}
