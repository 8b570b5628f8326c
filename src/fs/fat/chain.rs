//! Cluster chain traversal, allocation, and resizing.
//!
//! Free-cluster search is a linear scan from cluster 2; there is no free
//! list or bitmap, which is fine at the volume sizes this targets. Chain
//! length is rediscovered by re-walking from the start on every resize, an
//! accepted O(chain length) cost per size-changing write.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};

use super::FatVolume;
use crate::device::block::BlockDevice;
use crate::fs::{FileSystemError, FileSystemErrorKind, Result};

fn broken_chain(message: &'static str) -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::BrokenFileSystem,
        message,
    }
}

impl FatVolume {
    /// Table entry for `cluster`: the next cluster in its chain, an
    /// end-of-chain sentinel, or zero (free).
    pub fn next_cluster(&mut self, device: &dyn BlockDevice, cluster: u32) -> Result<u32> {
        self.table.get_entry(device, cluster)
    }

    /// Every cluster of the chain starting at `start`, in order.
    pub fn chain_clusters(&mut self, device: &dyn BlockDevice, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut cluster = start;
        loop {
            if !self.geometry.cluster_in_range(cluster) {
                return Err(super::invalid_cluster_error());
            }
            chain.push(cluster);
            // A chain longer than the volume has clusters is a loop.
            if chain.len() > self.geometry.cluster_count() as usize {
                return Err(broken_chain("cluster chain does not terminate"));
            }
            let next = self.table.get_entry(device, cluster)?;
            if self.geometry.variant.is_end_of_chain(next) {
                return Ok(chain);
            }
            if next == 0 {
                return Err(broken_chain("free cluster linked into chain"));
            }
            cluster = next;
        }
    }

    /// Read a whole chain's content into one buffer. Returns the bytes and
    /// the cluster count.
    pub fn read_chain(&mut self, device: &dyn BlockDevice, start: u32) -> Result<(Vec<u8>, u32)> {
        let chain = self.chain_clusters(device, start)?;
        let cluster_size = self.cluster_size();
        let mut content = vec![0u8; chain.len() * cluster_size];
        for (i, &cluster) in chain.iter().enumerate() {
            self.read_cluster(
                device,
                cluster,
                &mut content[i * cluster_size..(i + 1) * cluster_size],
            )?;
        }
        let count = chain.len() as u32;
        Ok((content, count))
    }

    /// First free cluster, scanning upward from cluster 2.
    pub fn find_free_cluster(&mut self, device: &dyn BlockDevice) -> Result<u32> {
        for cluster in 2..=self.geometry.max_cluster() {
            if self.table.get_entry(device, cluster)? == 0 {
                return Ok(cluster);
            }
        }
        warn!("{:?} volume out of free clusters", self.geometry.variant);
        Err(FileSystemError {
            kind: FileSystemErrorKind::NoSpace,
            message: "no free cluster available",
        })
    }

    /// Allocate one cluster: zero-fill its data region, link it after
    /// `predecessor` (zero means a fresh chain head), mark it end-of-chain,
    /// and flush the table.
    pub fn allocate_cluster(&mut self, device: &dyn BlockDevice, predecessor: u32) -> Result<u32> {
        let cluster = self.find_free_cluster(device)?;
        self.clear_cluster(device, cluster)?;
        self.table
            .set_entry(device, cluster, self.geometry.variant.end_of_chain())?;
        if predecessor != 0 {
            self.table.set_entry(device, predecessor, cluster)?;
        }
        self.table.flush(device)?;
        debug!("allocated cluster {} after {}", cluster, predecessor);
        Ok(cluster)
    }

    /// Grow or shrink a chain to exactly `clusters` clusters, flushing the
    /// table afterwards. Returns the chain after resizing.
    pub fn resize_chain(
        &mut self,
        device: &dyn BlockDevice,
        start: u32,
        clusters: u32,
    ) -> Result<Vec<u32>> {
        if clusters == 0 {
            return Err(FileSystemError {
                kind: FileSystemErrorKind::InvalidArgument,
                message: "chain cannot be resized to zero clusters",
            });
        }
        let mut chain = self.chain_clusters(device, start)?;
        let current = chain.len() as u32;
        if clusters > current {
            let mut last = chain[chain.len() - 1];
            for _ in current..clusters {
                last = self.allocate_cluster(device, last)?;
                chain.push(last);
            }
        } else if clusters < current {
            let keep = clusters as usize;
            self.table
                .set_entry(device, chain[keep - 1], self.geometry.variant.end_of_chain())?;
            for &cluster in &chain[keep..] {
                self.table.set_entry(device, cluster, 0)?;
            }
            chain.truncate(keep);
            self.table.flush(device)?;
        }
        Ok(chain)
    }

    /// Free every cluster of a chain by zeroing its table entries, then
    /// flush.
    pub fn release_chain(&mut self, device: &dyn BlockDevice, start: u32) -> Result<()> {
        let chain = self.chain_clusters(device, start)?;
        for &cluster in &chain {
            self.table.set_entry(device, cluster, 0)?;
        }
        self.table.flush(device)?;
        debug!("released {} clusters from {}", chain.len(), start);
        Ok(())
    }

    /// Read `buffer.len()` bytes of file content starting at byte `offset`,
    /// clamped to the recorded `size`. Returns the number of bytes read.
    pub fn read_file_range(
        &mut self,
        device: &dyn BlockDevice,
        start: u32,
        offset: u32,
        size: u32,
        buffer: &mut [u8],
    ) -> Result<usize> {
        if offset >= size || buffer.is_empty() {
            return Ok(0);
        }
        if !self.geometry.cluster_in_range(start) {
            return Err(super::invalid_cluster_error());
        }
        let wanted = buffer.len().min((size - offset) as usize);
        let cluster_size = self.cluster_size();

        let mut cluster = start;
        for _ in 0..offset as usize / cluster_size {
            let next = self.next_cluster(device, cluster)?;
            if self.geometry.variant.is_end_of_chain(next) || next == 0 {
                return Err(broken_chain("chain shorter than recorded size"));
            }
            cluster = next;
        }

        let mut within = offset as usize % cluster_size;
        let mut copied = 0;
        let mut cluster_buffer = vec![0u8; cluster_size];
        loop {
            self.read_cluster(device, cluster, &mut cluster_buffer)?;
            let count = (cluster_size - within).min(wanted - copied);
            buffer[copied..copied + count].copy_from_slice(&cluster_buffer[within..within + count]);
            copied += count;
            within = 0;
            if copied == wanted {
                return Ok(copied);
            }
            let next = self.next_cluster(device, cluster)?;
            if self.geometry.variant.is_end_of_chain(next) || next == 0 {
                return Err(broken_chain("chain shorter than recorded size"));
            }
            cluster = next;
        }
    }
}
