//! Drive-letter namespace over mounted partitions.
//!
//! The manager keeps a registry of block devices and a table of mounted
//! partitions, each tagged with a single letter assigned in mount order
//! from `A`. Absolute paths carry the letter (`"A:/dir/file"`); relative
//! paths resolve against a directory handle. File handles bundle the
//! owning partition, the resolved node, and a byte cursor advanced by
//! sequential reads and writes.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use hashbrown::HashMap;
use log::info;

use crate::device::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::fat::boot::BootSector;
use crate::fs::fat::fat12::Fat12FileSystem;
use crate::fs::fat::fat32::Fat32FileSystem;
use crate::fs::fat::{FatNode, FatVariant};
use crate::fs::{
    DirectoryEntryInfo, FileSystemError, FileSystemErrorKind, FileSystemOperations, Result,
    SeekFrom,
};

/// An open file: owning partition, resolved node, and cursor.
///
/// The node is a snapshot taken at open time. Two handles to the same
/// entry do not see each other's writes; callers coordinate themselves.
#[derive(Debug)]
pub struct FileHandle {
    pub partition: char,
    pub node: FatNode,
    pub position: u32,
}

/// An open directory used as the base for relative operations.
#[derive(Debug)]
pub struct DirHandle {
    pub partition: char,
    pub node: FatNode,
}

pub struct VfsManager {
    devices: HashMap<usize, Arc<dyn BlockDevice>>,
    next_device_id: usize,
    partitions: BTreeMap<char, Box<dyn FileSystemOperations>>,
}

fn no_partition_error() -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::NotFound,
        message: "no partition mounted under that letter",
    }
}

fn stale_handle_error() -> FileSystemError {
    FileSystemError {
        kind: FileSystemErrorKind::InvalidHandle,
        message: "handle references an unmounted partition",
    }
}

/// Split `"A:/dir/file"` into the partition letter and the
/// partition-relative remainder.
fn split_absolute(path: &str) -> Result<(char, &str)> {
    let invalid = |message| FileSystemError {
        kind: FileSystemErrorKind::InvalidPath,
        message,
    };
    let (prefix, rest) = path
        .split_once(':')
        .ok_or(invalid("path carries no partition letter"))?;
    let mut letters = prefix.chars();
    let letter = letters.next().ok_or(invalid("empty partition letter"))?;
    if letters.next().is_some() {
        return Err(invalid("partition letter must be a single character"));
    }
    if !rest.starts_with('/') {
        return Err(invalid("absolute path must follow the partition letter"));
    }
    Ok((letter.to_ascii_uppercase(), rest))
}

impl VfsManager {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
            next_device_id: 0,
            partitions: BTreeMap::new(),
        }
    }

    /// Register a block device and return its id for later mounting.
    pub fn register_device(&mut self, device: Arc<dyn BlockDevice>) -> usize {
        let id = self.next_device_id;
        self.next_device_id += 1;
        info!(
            "vfs: registered device {} as id {} ({} sectors)",
            device.disk_name(),
            id,
            device.sector_count()
        );
        self.devices.insert(id, device);
        id
    }

    pub fn device(&self, id: usize) -> Option<&Arc<dyn BlockDevice>> {
        self.devices.get(&id)
    }

    /// Probe sector 0 of a registered device, construct the matching
    /// driver, and mount it.
    pub fn mount_auto(&mut self, device_id: usize) -> Result<char> {
        let device = self
            .devices
            .get(&device_id)
            .cloned()
            .ok_or(FileSystemError {
                kind: FileSystemErrorKind::InvalidArgument,
                message: "unknown device id",
            })?;
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sectors(0, 1, &mut sector)?;
        let boot = BootSector::parse(&sector).map_err(|_| FileSystemError {
            kind: FileSystemErrorKind::BrokenFileSystem,
            message: "no filesystem detected",
        })?;
        let filesystem: Box<dyn FileSystemOperations> = match boot.variant {
            FatVariant::Fat12 => Box::new(Fat12FileSystem::mount(device)?),
            FatVariant::Fat32 => Box::new(Fat32FileSystem::mount(device)?),
        };
        self.mount(filesystem)
    }

    /// Mount a filesystem under the lowest free letter.
    pub fn mount(&mut self, filesystem: Box<dyn FileSystemOperations>) -> Result<char> {
        let letter = ('A'..='Z')
            .find(|letter| !self.partitions.contains_key(letter))
            .ok_or(FileSystemError {
                kind: FileSystemErrorKind::NoSpace,
                message: "all partition letters are taken",
            })?;
        info!(
            "vfs: mounted {} volume \"{}\" as {}:",
            filesystem.name(),
            filesystem.volume_label(),
            letter
        );
        self.partitions.insert(letter, filesystem);
        Ok(letter)
    }

    /// Drop a mounted partition. Outstanding handles for it become stale
    /// and fail with an invalid-handle error.
    pub fn unmount(&mut self, letter: char) -> Result<()> {
        self.partitions
            .remove(&letter)
            .map(|_| ())
            .ok_or(no_partition_error())
    }

    pub fn volume_label(&self, letter: char) -> Result<String> {
        self.partitions
            .get(&letter)
            .map(|filesystem| filesystem.volume_label())
            .ok_or(no_partition_error())
    }

    fn partition_for_path(&mut self, letter: char) -> Result<&mut (dyn FileSystemOperations + 'static)> {
        self.partitions
            .get_mut(&letter)
            .map(|filesystem| filesystem.as_mut())
            .ok_or(no_partition_error())
    }

    fn partition_for_handle(&mut self, letter: char) -> Result<&mut (dyn FileSystemOperations + 'static)> {
        self.partitions
            .get_mut(&letter)
            .map(|filesystem| filesystem.as_mut())
            .ok_or(stale_handle_error())
    }

    pub fn open_file(&mut self, path: &str) -> Result<FileHandle> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        let node = filesystem.open_file(&root, rest)?;
        Ok(FileHandle {
            partition: letter,
            node,
            position: 0,
        })
    }

    pub fn create_file(&mut self, path: &str) -> Result<FileHandle> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        let node = filesystem.create_file(&root, rest)?;
        Ok(FileHandle {
            partition: letter,
            node,
            position: 0,
        })
    }

    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        filesystem.remove_file(&root, rest)
    }

    pub fn open_dir(&mut self, path: &str) -> Result<DirHandle> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        let node = filesystem.open_dir(&root, rest)?;
        Ok(DirHandle {
            partition: letter,
            node,
        })
    }

    pub fn make_dir(&mut self, path: &str) -> Result<DirHandle> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        let node = filesystem.make_dir(&root, rest)?;
        Ok(DirHandle {
            partition: letter,
            node,
        })
    }

    pub fn remove_dir(&mut self, path: &str) -> Result<()> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        filesystem.remove_dir(&root, rest)
    }

    pub fn open_file_at(&mut self, dir: &DirHandle, path: &str) -> Result<FileHandle> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        let node = filesystem.open_file(&dir.node, path)?;
        Ok(FileHandle {
            partition: dir.partition,
            node,
            position: 0,
        })
    }

    pub fn create_file_at(&mut self, dir: &DirHandle, path: &str) -> Result<FileHandle> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        let node = filesystem.create_file(&dir.node, path)?;
        Ok(FileHandle {
            partition: dir.partition,
            node,
            position: 0,
        })
    }

    pub fn remove_file_at(&mut self, dir: &DirHandle, path: &str) -> Result<()> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        filesystem.remove_file(&dir.node, path)
    }

    pub fn open_dir_at(&mut self, dir: &DirHandle, path: &str) -> Result<DirHandle> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        let node = filesystem.open_dir(&dir.node, path)?;
        Ok(DirHandle {
            partition: dir.partition,
            node,
        })
    }

    pub fn make_dir_at(&mut self, dir: &DirHandle, path: &str) -> Result<DirHandle> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        let node = filesystem.make_dir(&dir.node, path)?;
        Ok(DirHandle {
            partition: dir.partition,
            node,
        })
    }

    pub fn remove_dir_at(&mut self, dir: &DirHandle, path: &str) -> Result<()> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        filesystem.remove_dir(&dir.node, path)
    }

    /// Read from the handle's cursor, advancing it by the bytes read.
    pub fn read(&mut self, handle: &mut FileHandle, buffer: &mut [u8]) -> Result<usize> {
        let filesystem = self.partition_for_handle(handle.partition)?;
        let read = filesystem.read_at(&handle.node, handle.position, buffer)?;
        handle.position += read as u32;
        Ok(read)
    }

    /// Write at the handle's cursor, advancing it by the bytes persisted.
    pub fn write(&mut self, handle: &mut FileHandle, buffer: &[u8]) -> Result<usize> {
        let filesystem = self.partition_for_handle(handle.partition)?;
        let written = filesystem.write_at(&mut handle.node, handle.position, buffer)?;
        handle.position += written as u32;
        Ok(written)
    }

    /// Move the handle's cursor and return the new position. Positions
    /// beyond the current size are legal; the next write fills the gap.
    pub fn seek(&mut self, handle: &mut FileHandle, from: SeekFrom) -> Result<u32> {
        if !self.partitions.contains_key(&handle.partition) {
            return Err(stale_handle_error());
        }
        let target = match from {
            SeekFrom::Start(position) => i64::from(position),
            SeekFrom::Current(delta) => i64::from(handle.position) + i64::from(delta),
            SeekFrom::End(delta) => i64::from(handle.node.entry.size) + i64::from(delta),
        };
        if target < 0 || target > i64::from(u32::MAX) {
            return Err(FileSystemError {
                kind: FileSystemErrorKind::InvalidArgument,
                message: "seek position out of range",
            });
        }
        handle.position = target as u32;
        Ok(handle.position)
    }

    pub fn list_dir(&mut self, path: &str, out: &mut [DirectoryEntryInfo]) -> Result<usize> {
        let (letter, rest) = split_absolute(path)?;
        let filesystem = self.partition_for_path(letter)?;
        let root = filesystem.root();
        let node = filesystem.open_dir(&root, rest)?;
        filesystem.list_dir(&node, out)
    }

    pub fn list_dir_at(&mut self, dir: &DirHandle, out: &mut [DirectoryEntryInfo]) -> Result<usize> {
        let filesystem = self.partition_for_handle(dir.partition)?;
        filesystem.list_dir(&dir.node, out)
    }

    /// Open `path` and read from its start in one step.
    pub fn read_file(&mut self, path: &str, buffer: &mut [u8]) -> Result<usize> {
        let mut handle = self.open_file(path)?;
        self.read(&mut handle, buffer)
    }

    /// Open `path` and overwrite from its start in one step.
    pub fn write_file(&mut self, path: &str, buffer: &[u8]) -> Result<usize> {
        let mut handle = self.open_file(path)?;
        self.write(&mut handle, buffer)
    }
}

impl Default for VfsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec;

    use super::*;
    use crate::fs::FileType;
    use crate::fs::fat::DirLocation;
    use crate::fs::fat::testimg;

    fn manager_with_both_volumes() -> (VfsManager, char, char) {
        let mut vfs = VfsManager::new();
        let fat12 = vfs.register_device(testimg::fat12_device());
        let fat32 = vfs.register_device(testimg::fat32_device());
        let a = vfs.mount_auto(fat12).unwrap();
        let b = vfs.mount_auto(fat32).unwrap();
        (vfs, a, b)
    }

    fn blank_info() -> DirectoryEntryInfo {
        DirectoryEntryInfo {
            name: String::new(),
            file_type: FileType::RegularFile,
            size: 0,
        }
    }

    #[test]
    fn test_mount_auto_assigns_letters_in_order() {
        let (vfs, a, b) = manager_with_both_volumes();
        assert_eq!(a, 'A');
        assert_eq!(b, 'B');
        assert_eq!(vfs.volume_label('A').unwrap(), "TESTVOL");
        assert_eq!(vfs.volume_label('B').unwrap(), "TESTVOL32");
    }

    #[test]
    fn test_path_parsing_failures() {
        let (mut vfs, _, _) = manager_with_both_volumes();
        assert_eq!(
            vfs.open_file("no-separator").unwrap_err().kind,
            FileSystemErrorKind::InvalidPath
        );
        assert_eq!(
            vfs.open_file("AB:/x").unwrap_err().kind,
            FileSystemErrorKind::InvalidPath
        );
        assert_eq!(
            vfs.open_file("A:relative").unwrap_err().kind,
            FileSystemErrorKind::InvalidPath
        );
        assert_eq!(
            vfs.create_file("Z:/ghost").unwrap_err().kind,
            FileSystemErrorKind::NotFound
        );
    }

    #[test]
    fn test_end_to_end_file_lifecycle() {
        let (mut vfs, _, _) = manager_with_both_volumes();

        vfs.make_dir("A:/DOCS").unwrap();
        let mut file = vfs.create_file("A:/DOCS/NOTE.TXT").unwrap();

        assert_eq!(vfs.write(&mut file, b"first ").unwrap(), 6);
        assert_eq!(vfs.write(&mut file, b"second").unwrap(), 6);
        assert_eq!(file.position, 12);

        vfs.seek(&mut file, SeekFrom::Start(0)).unwrap();
        let mut back = [0u8; 32];
        let read = vfs.read(&mut file, &mut back).unwrap();
        assert_eq!(&back[..read], b"first second");

        let mut out = vec![blank_info(); 8];
        let count = vfs.list_dir("A:/DOCS", &mut out).unwrap();
        assert_eq!(count, 3);
        assert!(out.iter().take(count).any(|e| e.name == "NOTE.TXT"));

        vfs.remove_file("A:/DOCS/NOTE.TXT").unwrap();
        assert_eq!(
            vfs.open_file("A:/DOCS/NOTE.TXT").unwrap_err().kind,
            FileSystemErrorKind::NotFound
        );
    }

    #[test]
    fn test_make_dir_populates_dot_entries() {
        let (mut vfs, _, _) = manager_with_both_volumes();

        let sub = vfs.make_dir("A:/SUB").unwrap();
        assert_eq!(
            vfs.make_dir("A:/SUB").unwrap_err().kind,
            FileSystemErrorKind::AlreadyExists
        );

        let mut out = vec![blank_info(); 8];
        let count = vfs.list_dir_at(&sub, &mut out).unwrap();
        assert_eq!(count, 2);
        assert_eq!(out[0].name, ".");
        assert_eq!(out[1].name, "..");

        // `..` of a first-level directory leads back to the root region.
        let back = vfs.open_dir("A:/SUB/..").unwrap();
        assert_eq!(back.node.content, DirLocation::RootRegion);
    }

    #[test]
    fn test_mount_auto_rejects_blank_device() {
        let mut vfs = VfsManager::new();
        let blank = vfs.register_device(alloc::sync::Arc::new(
            crate::device::block::mockblk::MockBlockDevice::new("blank", 16),
        ));
        assert_eq!(
            vfs.mount_auto(blank).unwrap_err().kind,
            FileSystemErrorKind::BrokenFileSystem
        );
    }

    #[test]
    fn test_relative_operations_through_dir_handle() {
        let (mut vfs, _, _) = manager_with_both_volumes();

        let docs = vfs.make_dir("B:/DOCS").unwrap();
        let mut file = vfs.create_file_at(&docs, "LOG.BIN").unwrap();
        vfs.write(&mut file, &[7u8; 100]).unwrap();

        let reopened = vfs.open_file_at(&docs, "LOG.BIN").unwrap();
        assert_eq!(reopened.node.entry.size, 100);

        let nested = vfs.make_dir_at(&docs, "INNER").unwrap();
        let mut out = vec![blank_info(); 8];
        let count = vfs.list_dir_at(&nested, &mut out).unwrap();
        assert_eq!(count, 2);

        vfs.remove_file_at(&docs, "LOG.BIN").unwrap();
        assert_eq!(
            vfs.open_file_at(&docs, "LOG.BIN").unwrap_err().kind,
            FileSystemErrorKind::NotFound
        );
        assert_eq!(
            vfs.remove_dir_at(&docs, "INNER").unwrap_err().kind,
            FileSystemErrorKind::NotSupported
        );
    }

    #[test]
    fn test_seek_origins_and_bounds() {
        let (mut vfs, _, _) = manager_with_both_volumes();
        let mut file = vfs.create_file("A:/SEEK.BIN").unwrap();
        vfs.write(&mut file, &[1u8; 100]).unwrap();

        assert_eq!(vfs.seek(&mut file, SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(vfs.seek(&mut file, SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(vfs.seek(&mut file, SeekFrom::Current(-15)).unwrap(), 0);
        assert_eq!(vfs.seek(&mut file, SeekFrom::End(-40)).unwrap(), 60);
        assert_eq!(vfs.seek(&mut file, SeekFrom::End(20)).unwrap(), 120);

        assert_eq!(
            vfs.seek(&mut file, SeekFrom::Current(-500)).unwrap_err().kind,
            FileSystemErrorKind::InvalidArgument
        );
        // A failed seek leaves the cursor where it was.
        assert_eq!(file.position, 120);
    }

    #[test]
    fn test_stale_handles_after_unmount() {
        let (mut vfs, _, _) = manager_with_both_volumes();
        let mut file = vfs.create_file("A:/KEEP.TXT").unwrap();
        vfs.write(&mut file, b"data").unwrap();

        vfs.unmount('A').unwrap();
        assert_eq!(
            vfs.read(&mut file, &mut [0u8; 4]).unwrap_err().kind,
            FileSystemErrorKind::InvalidHandle
        );
        assert_eq!(
            vfs.seek(&mut file, SeekFrom::Start(0)).unwrap_err().kind,
            FileSystemErrorKind::InvalidHandle
        );
        assert_eq!(
            vfs.open_file("A:/KEEP.TXT").unwrap_err().kind,
            FileSystemErrorKind::NotFound
        );

        // The letter is free again for the next mount.
        let replacement = vfs.register_device(testimg::fat12_device());
        assert_eq!(vfs.mount_auto(replacement).unwrap(), 'A');
    }

    #[test]
    fn test_partitions_are_isolated() {
        let (mut vfs, _, _) = manager_with_both_volumes();
        vfs.create_file("A:/ONLYA.TXT").unwrap();

        assert!(vfs.open_file("A:/ONLYA.TXT").is_ok());
        assert_eq!(
            vfs.open_file("B:/ONLYA.TXT").unwrap_err().kind,
            FileSystemErrorKind::NotFound
        );
    }

    #[test]
    fn test_whole_file_convenience_io() {
        let (mut vfs, _, _) = manager_with_both_volumes();
        vfs.create_file("B:/BLOB").unwrap();

        assert_eq!(vfs.write_file("B:/BLOB", b"payload").unwrap(), 7);
        let mut back = [0u8; 16];
        let read = vfs.read_file("B:/BLOB", &mut back).unwrap();
        assert_eq!(&back[..read], b"payload");
    }
}
