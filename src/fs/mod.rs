//! Filesystem layer: shared types, error taxonomy, and the operation
//! contract that every on-disk driver implements.

pub mod fat;

use alloc::string::String;
use core::fmt;

use crate::device::block::BlockIOError;
use crate::fs::fat::FatNode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileSystemErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    InvalidData,
    InvalidPath,
    InvalidArgument,
    InvalidHandle,
    DeviceError,
    NoSpace,
    DirectoryFull,
    BrokenFileSystem,
    NotSupported,
}

pub struct FileSystemError {
    pub kind: FileSystemErrorKind,
    pub message: &'static str,
}

impl fmt::Debug for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileSystemError {{ kind: {:?}, message: {} }}",
            self.kind, self.message
        )
    }
}

impl From<BlockIOError> for FileSystemError {
    fn from(err: BlockIOError) -> Self {
        FileSystemError {
            kind: FileSystemErrorKind::DeviceError,
            message: match err {
                BlockIOError::OutOfRange => "sector out of range",
                BlockIOError::ShortBuffer => "buffer too small for transfer",
                BlockIOError::ReadFailed => "device read failed",
                BlockIOError::WriteFailed => "device write failed",
            },
        }
    }
}

/// Result type for file system operations
pub type Result<T> = core::result::Result<T, FileSystemError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileType {
    RegularFile,
    Directory,
}

/// One record produced by a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntryInfo {
    pub name: String,
    pub file_type: FileType,
    pub size: u32,
}

/// Origin for a seek operation. The variants are the only recognized
/// origins, so an out-of-range origin cannot reach a driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

/// Operation set every mounted filesystem exposes to the VFS layer.
///
/// Paths are partition-relative. Operations that resolve a path take a
/// starting directory node; absolute resolution starts from [`Self::root`].
pub trait FileSystemOperations: Send + Sync {
    fn name(&self) -> &'static str;

    /// Volume label recorded in the boot sector, trailing spaces stripped.
    fn volume_label(&self) -> String;

    /// Synthetic node for the root directory.
    fn root(&self) -> FatNode;

    fn open_file(&mut self, dir: &FatNode, path: &str) -> Result<FatNode>;
    fn create_file(&mut self, dir: &FatNode, path: &str) -> Result<FatNode>;
    fn remove_file(&mut self, dir: &FatNode, path: &str) -> Result<()>;

    fn open_dir(&mut self, dir: &FatNode, path: &str) -> Result<FatNode>;
    fn make_dir(&mut self, dir: &FatNode, path: &str) -> Result<FatNode>;
    fn remove_dir(&mut self, dir: &FatNode, path: &str) -> Result<()>;

    /// Read up to `buffer.len()` bytes starting at byte `offset`, clamped to
    /// the node's recorded size. Returns the number of bytes read.
    fn read_at(&mut self, node: &FatNode, offset: u32, buffer: &mut [u8]) -> Result<usize>;

    /// Write `buffer` starting at byte `offset`, growing the node's cluster
    /// chain as needed. Returns the number of bytes actually persisted,
    /// which is less than `buffer.len()` only when the volume runs out of
    /// free clusters mid-write.
    fn write_at(&mut self, node: &mut FatNode, offset: u32, buffer: &[u8]) -> Result<usize>;

    /// Stream directory entries into `out`, skipping hidden and deleted
    /// entries, stopping at end-of-directory or capacity.
    fn list_dir(&mut self, node: &FatNode, out: &mut [DirectoryEntryInfo]) -> Result<usize>;
}
