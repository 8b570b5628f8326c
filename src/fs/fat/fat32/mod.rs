//! 32-bit variant driver.
//!
//! The root directory is an ordinary cluster chain and grows like any
//! other directory. Writes are whole-cluster read-modify-writes that
//! extend the chain lazily at the end-of-chain marker; when the volume
//! fills mid-write, the bytes persisted so far are kept and the size
//! field advances only over them. Removing a file releases its whole
//! chain.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use log::{debug, info, warn};

use super::boot::BootSector;
use super::dir::{split_parent, tombstone_entry, update_entry_size};
use super::name::encode_short_name;
use super::{FatNode, FatVariant, FatVolume, not_a_directory_error, not_a_file_error};
use crate::device::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::{
    DirectoryEntryInfo, FileSystemError, FileSystemErrorKind, FileSystemOperations, FileType,
    Result,
};


pub struct Fat32FileSystem {
    device: Arc<dyn BlockDevice>,
    volume: FatVolume,
}

impl core::fmt::Debug for Fat32FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fat32FileSystem").finish_non_exhaustive()
    }
}

impl Fat32FileSystem {
    /// Mount a 32-bit volume found at sector 0 of `device`.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sectors(0, 1, &mut sector)?;
        let boot = BootSector::parse(&sector)?;
        if boot.variant != FatVariant::Fat32 {
            return Err(FileSystemError {
                kind: FileSystemErrorKind::InvalidData,
                message: "volume does not carry a 32-bit table",
            });
        }
        let volume = FatVolume::new(boot.geometry());
        info!(
            "fat32: mounted {} ({} sectors, root cluster {}, label \"{}\")",
            device.disk_name(),
            volume.geometry.total_sectors,
            volume.geometry.root_cluster,
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

    /// Step to the cluster after `cluster`, allocating one at the chain
    /// end.
    fn next_or_allocate(&mut self, cluster: u32) -> Result<u32> {
        let next = self.volume.next_cluster(self.device.as_ref(), cluster)?;
        if self.volume.geometry.variant.is_end_of_chain(next) {
            return self.volume.allocate_cluster(self.device.as_ref(), cluster);
        }
        if next == 0 {
            return Err(FileSystemError {
                kind: FileSystemErrorKind::BrokenFileSystem,
                message: "free cluster linked into chain",
            });
        }
        Ok(next)
    }
}

impl FileSystemOperations for Fat32FileSystem {
    fn name(&self) -> &'static str {
        "fat32"
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
        tombstone_entry(self.device.as_ref(), &node)?;
        self.volume
            .release_chain(self.device.as_ref(), node.entry.start_cluster)?;
        debug!("fat32: removed entry and released chain at {}", node.entry.start_cluster);
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
        offset
            .checked_add(buffer.len() as u32)
            .ok_or(FileSystemError {
                kind: FileSystemErrorKind::InvalidArgument,
                message: "write range exceeds addressable file size",
            })?;
        if !self.volume.geometry.cluster_in_range(node.entry.start_cluster) {
            return Err(super::invalid_cluster_error());
        }
        let cluster_size = self.volume.cluster_size();

        // Walk to the first cluster under the write, allocating across any
        // gap beyond the current chain end. A failure here has written
        // nothing, so it aborts the whole operation.
        let mut cluster = node.entry.start_cluster;
        for _ in 0..offset as usize / cluster_size {
            cluster = self.next_or_allocate(cluster)?;
        }

        let mut within = offset as usize % cluster_size;
        let mut written = 0usize;
        let mut cluster_buffer = vec![0u8; cluster_size];
        loop {
            let count = (cluster_size - within).min(buffer.len() - written);
            self.volume
                .read_cluster(self.device.as_ref(), cluster, &mut cluster_buffer)?;
            cluster_buffer[within..within + count]
                .copy_from_slice(&buffer[written..written + count]);
            self.volume
                .write_cluster(self.device.as_ref(), cluster, &cluster_buffer)?;
            written += count;
            within = 0;
            if written == buffer.len() {
                break;
            }
            match self.next_or_allocate(cluster) {
                Ok(next) => cluster = next,
                Err(err) if err.kind == FileSystemErrorKind::NoSpace => {
                    // Keep what is already on disk; the size field below
                    // only advances over persisted bytes.
                    warn!(
                        "fat32: volume filled mid-write, {} of {} bytes persisted",
                        written,
                        buffer.len()
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let end = offset + written as u32;
        if end > node.entry.size {
            node.entry.size = end;
            update_entry_size(self.device.as_ref(), node)?;
        }
        self.volume.table.flush(self.device.as_ref())?;
        Ok(written)
    }

    fn list_dir(&mut self, node: &FatNode, out: &mut [DirectoryEntryInfo]) -> Result<usize> {
        if !node.is_directory() {
            return Err(not_a_directory_error());
        }
        self.volume
            .list_directory(self.device.as_ref(), node.content, out)
    }
}
