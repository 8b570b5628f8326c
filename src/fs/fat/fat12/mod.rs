//! 12-bit variant driver.
//!
//! The root directory is a fixed region outside cluster space and cannot
//! grow. Writes extend the chain up front, so a failed extension leaves
//! the file untouched; new clusters are written directly without a
//! pre-read. Removing a file only tombstones its entry, the cluster chain
//! stays allocated until the volume is rebuilt offline.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use log::{debug, info};

use super::boot::BootSector;
use super::dir::{split_parent, tombstone_entry, update_entry_size};
use super::name::encode_short_name;
use super::{FatNode, FatVariant, FatVolume, not_a_directory_error, not_a_file_error};
use crate::device::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::{
    DirectoryEntryInfo, FileSystemError, FileSystemErrorKind, FileSystemOperations, FileType,
    Result,
};


pub struct Fat12FileSystem {
    device: Arc<dyn BlockDevice>,
    volume: FatVolume,
}

impl core::fmt::Debug for Fat12FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fat12FileSystem").finish_non_exhaustive()
    }
}

impl Fat12FileSystem {
    /// Mount a 12-bit volume found at sector 0 of `device`.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sectors(0, 1, &mut sector)?;
        let boot = BootSector::parse(&sector)?;
        if boot.variant != FatVariant::Fat12 {
            return Err(FileSystemError {
                kind: FileSystemErrorKind::InvalidData,
                message: "volume does not carry a 12-bit table",
            });
        }
        let volume = FatVolume::new(boot.geometry());
        info!(
            "fat12: mounted {} ({} sectors, label \"{}\")",
            device.disk_name(),
            volume.geometry.total_sectors,
            volume.geometry.label_string()
        );
        Ok(Self { device, volume })
    }

    /// Resolve the parent directory of `path` and encode its final
    /// component.
    fn resolve_parent(&mut self, dir: &FatNode, path: &str) -> Result<(FatNode, [u8; 11])> {
        let (parent_path, name) = split_parent(path);
        let parent = self
            .volume
            .resolve_path(self.device.as_ref(), dir, parent_path)?;
        if !parent.is_directory() {
            return Err(not_a_directory_error());
        }
        Ok((parent, encode_short_name(name)?))
    }
}

impl FileSystemOperations for Fat12FileSystem {
    fn name(&self) -> &'static str {
        "fat12"
    }

    fn volume_label(&self) -> String {
        self.volume.geometry.label_string()
    }

    fn root(&self) -> FatNode {
        self.volume.root_node()
    }

    fn open_file(&mut self, dir: &FatNode, path: &str) -> Result<FatNode> {
        let node = self.volume.resolve_path(self.device.as_ref(), dir, path)?;
        if node.is_directory() {
            return Err(not_a_file_error());
        }
        Ok(node)
    }

    fn create_file(&mut self, dir: &FatNode, path: &str) -> Result<FatNode> {
        let (parent, name) = self.resolve_parent(dir, path)?;
        self.volume.create_entry(
            self.device.as_ref(),
            parent.content,
            &name,
            FileType::RegularFile,
        )
    }

    fn remove_file(&mut self, dir: &FatNode, path: &str) -> Result<()> {
        let node = self.volume.resolve_path(self.device.as_ref(), dir, path)?;
        if node.is_directory() {
            return Err(not_a_file_error());
        }
        // The entry slot is reclaimed; the cluster chain stays allocated.
        tombstone_entry(self.device.as_ref(), &node)?;
        debug!("fat12: removed entry, chain at {} left in place", node.entry.start_cluster);
        Ok(())
    }

    fn open_dir(&mut self, dir: &FatNode, path: &str) -> Result<FatNode> {
        let node = self.volume.resolve_path(self.device.as_ref(), dir, path)?;
        if !node.is_directory() {
            return Err(not_a_directory_error());
        }
        Ok(node)
    }

    fn make_dir(&mut self, dir: &FatNode, path: &str) -> Result<FatNode> {
        let (parent, name) = self.resolve_parent(dir, path)?;
        self.volume.create_entry(
            self.device.as_ref(),
            parent.content,
            &name,
            FileType::Directory,
        )
    }

    fn remove_dir(&mut self, _dir: &FatNode, _path: &str) -> Result<()> {
        Err(FileSystemError {
            kind: FileSystemErrorKind::NotSupported,
            message: "directory removal is not supported",
        })
    }

    fn read_at(&mut self, node: &FatNode, offset: u32, buffer: &mut [u8]) -> Result<usize> {
        if node.is_directory() {
            return Err(not_a_file_error());
        }
        self.volume.read_file_range(
            self.device.as_ref(),
            node.entry.start_cluster,
            offset,
            node.entry.size,
            buffer,
        )
    }

    fn write_at(&mut self, node: &mut FatNode, offset: u32, buffer: &[u8]) -> Result<usize> {
        if node.is_directory() {
            return Err(not_a_file_error());
        }
        if buffer.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buffer.len() as u32)
            .ok_or(FileSystemError {
                kind: FileSystemErrorKind::InvalidArgument,
                message: "write range exceeds addressable file size",
            })? as usize;
        let cluster_size = self.volume.cluster_size();

        let start = node.entry.start_cluster;
        let mut chain = self.volume.chain_clusters(self.device.as_ref(), start)?;
        let existing = chain.len();
        let needed = end.div_ceil(cluster_size);
        if needed > existing {
            // Grow before touching any data, so a full volume fails the
            // whole write instead of half of it.
            chain = self
                .volume
                .resize_chain(self.device.as_ref(), start, needed as u32)?;
        }

        let mut cluster_buffer = vec![0u8; cluster_size];
        let first = offset as usize / cluster_size;
        let last = (end - 1) / cluster_size;
        let mut copied = 0usize;
        for index in first..=last {
            let begin = (offset as usize).max(index * cluster_size) - index * cluster_size;
            let finish = end.min((index + 1) * cluster_size) - index * cluster_size;
            let count = finish - begin;
            if begin != 0 || finish != cluster_size {
                if index < existing {
                    self.volume.read_cluster(
                        self.device.as_ref(),
                        chain[index],
                        &mut cluster_buffer,
                    )?;
                } else {
                    // Freshly allocated cluster: no pre-read, zero padding.
                    cluster_buffer.fill(0);
                }
            }
            cluster_buffer[begin..finish].copy_from_slice(&buffer[copied..copied + count]);
            self.volume
                .write_cluster(self.device.as_ref(), chain[index], &cluster_buffer)?;
            copied += count;
        }

        if end as u32 > node.entry.size {
            node.entry.size = end as u32;
            update_entry_size(self.device.as_ref(), node)?;
        }
        self.volume.table.flush(self.device.as_ref())?;
        Ok(buffer.len())
    }

    fn list_dir(&mut self, node: &FatNode, out: &mut [DirectoryEntryInfo]) -> Result<usize> {
        if !node.is_directory() {
            return Err(not_a_directory_error());
        }
        self.volume
            .list_directory(self.device.as_ref(), node.content, out)
    }
}
